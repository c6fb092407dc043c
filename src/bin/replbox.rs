use anyhow::Result;

fn main() -> Result<()> {
    replbox::cli::run()
}
