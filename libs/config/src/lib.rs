//! # Fabric Client Configuration
//!
//! This crate provides the application-level configuration for the fabric
//! lifecycle client: which client organizations the process acts for, the
//! user each of them signs as, and where each organization's network
//! description lives.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fabric_config::{load_config, defaults};
//!
//! let app = load_config(None).expect("application config");
//! for org in app.client_org_ids() {
//!     let settings = app.client_org(org).unwrap();
//!     println!("{} signs as {}", org, settings.user);
//! }
//! assert_eq!(defaults::identities::ADMIN_USER, "Admin");
//! ```

pub mod app_config;
pub mod defaults;

// Re-export commonly used types
pub use app_config::{load_config, AppConfig, ClientOrgSettings};
