use std::net::SocketAddr;

use clap::Parser;
use portfolio_auth::cli::{
    Args, build_config, handle_create_admin, init_logging, load_signing_secrets, open_database,
    validate_public_origin,
};
use portfolio_auth::create_app;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(secrets) = load_signing_secrets(
        args.access_secret_file.as_deref(),
        args.refresh_secret_file.as_deref(),
    ) else {
        std::process::exit(1);
    };

    let Some(public_origin) = validate_public_origin(&args.public_origin) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(email) = args.create_admin.as_deref()
        && !handle_create_admin(&db, email, args.bcrypt_cost).await
    {
        std::process::exit(1);
    }

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = match listener.local_addr() {
        Ok(local_addr) => local_addr,
        Err(e) => {
            error!(error = %e, "Failed to read local address");
            std::process::exit(1);
        }
    };

    let config = build_config(&args, db, &public_origin, secrets);
    let app = create_app(&config);

    info!(
        address = %local_addr,
        secure_cookies = config.secure_cookies,
        "Listening"
    );

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
