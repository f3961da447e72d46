use keymint_engine::ServiceConfig;

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    keymint_server::init_tracing(&config);

    if let Err(e) = keymint_server::run(config).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
