pub mod config;
pub mod endpoint;
pub mod openstack;
pub mod secret;
pub mod site;
pub mod token;

pub use config::config_command;
pub use endpoint::endpoint_command;
pub use openstack::{openstack_command, openstack_int_command};
pub use secret::secret_command;
pub use site::site_command;
pub use token::token_command;
