use std::env;
use std::fmt;

struct VersionInfo {
    name: &'static str,
    version: &'static str,
    os: &'static str,
    architecture: &'static str,
    input_formats: String,
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name           : {}", self.name)?;
        writeln!(f, "Version        : {}", self.version)?;
        writeln!(f, "OS             : {}", self.os)?;
        writeln!(f, "Architecture   : {}", self.architecture)?;
        write!(f, "Input formats  : {}", self.input_formats)
    }
}

pub fn run() {
    let info = VersionInfo {
        name: clap::crate_name!(),
        version: clap::crate_version!(),
        os: env::consts::OS,
        architecture: env::consts::ARCH,
        input_formats: kernel::ALLOWED_EXTENSIONS.join(", "),
    };
    println!("{info}");
}
