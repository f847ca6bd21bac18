fn main() -> anyhow::Result<()> {
    scanwatch_lib::run()
}
