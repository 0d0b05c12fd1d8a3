//! The upload server binary.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

fn main() -> anyhow::Result<()> {
    uploader_server::cli::execute()
}
