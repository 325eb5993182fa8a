fn main() -> anyhow::Result<()> {
    svcrunner::run()?;
    Ok(())
}
