//! CLI subcommands shared by the `toolpipe` and `tprun` binaries.

pub mod config;
pub mod run;

/// Version banner with the build metadata stamped by `build.rs`.
pub fn version_text() -> String {
    format!(
        "toolpipe {}\ncommit: {}\nbuilt: {}",
        env!("CARGO_PKG_VERSION"),
        env!("TP_GIT_SHA"),
        env!("TP_BUILD_TS")
    )
}
