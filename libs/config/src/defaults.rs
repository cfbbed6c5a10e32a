//! Shared defaults
//!
//! Constants used by both the configuration loader and the network layer so
//! that naming conventions live in one place.

/// Configuration file locations
pub mod files {
    /// File name of the application config inside a config directory
    pub const APP_CONFIG_FILE: &str = "fabricApp.json";

    /// Default application config location, relative to the working directory
    pub const DEFAULT_APP_CONFIG_PATH: &str = "config/fabricApp.json";

    /// Prefix of environment variables overriding application config keys
    pub const ENV_PREFIX: &str = "FABRIC";
}

/// Signing identity conventions
pub mod identities {
    /// Username of the administrative identity every organization enrolls
    pub const ADMIN_USER: &str = "Admin";
}

/// Topology naming conventions
pub mod topology {
    /// Organizations whose id contains this marker run the ordering service
    /// and never take part in the chaincode lifecycle
    pub const ORDERER_ORG_MARKER: &str = "orderer";
}

/// Lifecycle result markers
pub mod markers {
    /// Payload returned by a successful instantiate or upgrade
    pub const OK: &[u8] = b"OK";

    /// Payload returned when the chaincode was already instantiated
    pub const EXISTS: &[u8] = b"EXISTS";

    /// Placeholder payload for operations that produce no data
    pub const SENTINEL: &[u8] = &[0x00];
}
