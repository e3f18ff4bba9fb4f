//! Bridge configuration.
//!
//! Everything here is consumed when the loop owner is constructed; after that
//! the toolkit has been initialised and the values are frozen.

/// Environment variable overriding the initial log level.
pub const LOG_LEVEL_ENV: &str = "LIFETIME_BRIDGE_LOG_LEVEL";

/// Environment variable overriding the debug listener port.
pub const DEBUG_PORT_ENV: &str = "LIFETIME_BRIDGE_DEBUG_PORT";

/// Default debug listener port
pub const DEFAULT_DEBUG_PORT: u16 = 3768;

/// Default program name, used as `argv[0]` until the host sets arguments.
pub const DEFAULT_PROGRAM_NAME: &str = "lifetime-bridge";

/// Initial configuration for a [`Manager`](crate::Manager).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Diagnostic log level (0 = quiet, >0 dumps counters at exit)
    pub log_level: i32,
    /// Port for the optional debug listener
    pub debug_port: u16,
    /// Initial toolkit argument vector
    pub args: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_level: 0,
            debug_port: DEFAULT_DEBUG_PORT,
            args: vec![DEFAULT_PROGRAM_NAME.to_string()],
        }
    }
}

impl BridgeConfig {
    /// Defaults with environment overrides applied.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(LOG_LEVEL_ENV) {
            match parse_log_level(&value) {
                Some(level) => config.log_level = level,
                None => log::warn!("Ignoring invalid {}={:?}", LOG_LEVEL_ENV, value),
            }
        }

        if let Ok(value) = std::env::var(DEBUG_PORT_ENV) {
            match value.trim().parse::<u16>() {
                Ok(port) => config.debug_port = port,
                Err(_) => log::warn!("Ignoring invalid {}={:?}", DEBUG_PORT_ENV, value),
            }
        }

        config
    }
}

/// Parse a log level the way the host passes it (a decimal integer).
pub fn parse_log_level(value: &str) -> Option<i32> {
    value.trim().parse::<i32>().ok()
}

/// Toolkit-wide flags that must be set before the loop owner exists.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalFlag {
    ShareOpenGLContexts = 0,
    EnableQmlDebug = 1,
}

impl TryFrom<i32> for GlobalFlag {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GlobalFlag::ShareOpenGLContexts),
            1 => Ok(GlobalFlag::EnableQmlDebug),
            other => Err(other),
        }
    }
}

/// Current values of every [`GlobalFlag`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalFlags {
    share_opengl_contexts: bool,
    enable_debug_server: bool,
}

impl GlobalFlags {
    pub fn get(&self, flag: GlobalFlag) -> bool {
        match flag {
            GlobalFlag::ShareOpenGLContexts => self.share_opengl_contexts,
            GlobalFlag::EnableQmlDebug => self.enable_debug_server,
        }
    }

    pub fn set(&mut self, flag: GlobalFlag, value: bool) {
        match flag {
            GlobalFlag::ShareOpenGLContexts => self.share_opengl_contexts = value,
            GlobalFlag::EnableQmlDebug => self.enable_debug_server = value,
        }
    }
}
