pub mod bugreport;
pub mod client;
pub mod server;
pub mod version;

pub const SERVER_SUBCOMMAND: &str = "server";
pub const SERVER_DESCRIPTION: &str = "Run the conversion service";

pub const VERSION_SUBCOMMAND: &str = "version";
pub const VERSION_DESCRIPTION: &str = "Display the version and build information";

pub const BUGREPORT_SUBCOMMAND: &str = "bugreport";
pub const BUGREPORT_DESCRIPTION: &str = "Collect information about the system and the environment that you can send along with a bug report";

pub const CONVERT_SUBCOMMAND: &str = "convert";
pub const CONVERT_DESCRIPTION: &str = "Upload images to a running service and save the converted result";

pub const DEFAULT_URI: &str = "http://localhost:8000";
