use bugreport::{
    bugreport,
    collector::{CompileTimeInformation, EnvironmentVariables, OperatingSystem, SoftwareVersion},
    format::Markdown,
};

pub fn run() {
    bugreport!()
        .info(SoftwareVersion::default())
        .info(OperatingSystem::default())
        .info(EnvironmentVariables::list(&[
            "ANYTOANY_PORT",
            "ANYTOANY_DATA_DIR",
            "ANYTOANY_ARCHIVE_GRACE_SECS",
            "ANYTOANY_MAX_REQUEST_BYTES",
            "RUST_LOG",
        ]))
        .info(CompileTimeInformation::default())
        .print::<Markdown>();
}
