#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = postern::find_config_file()?;
    let postern = postern::Postern::load(&config_path)?;

    postern.serve().await
}
