use std::sync::Mutex;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;

mod metadata;
mod routes;
mod sampler;
mod stress;

#[derive(Parser)]
#[command(name = "stressd", about = "CPU load injection and per-core utilization service")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = Args::parse();

    // Seed the baseline snapshot now so the first metrics call has a delta.
    let sampler = web::Data::new(Mutex::new(
        sampler::CpuSampler::new().context("seeding initial cpu snapshot")?,
    ));
    let controller = web::Data::new(stress::StressController::new());
    let host = web::Data::new(metadata::fetch_host_info().await);
    log::info!(
        "host identity: {} ({}), {} logical cores",
        host.instance_id,
        host.availability_zone,
        num_cpus::get()
    );

    log::info!("listening on 0.0.0.0:{}", args.port);
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(Cors::permissive())
            .app_data(sampler.clone())
            .app_data(controller.clone())
            .app_data(host.clone())
            .service(routes::index)
            .service(routes::start_stress)
            .service(routes::stop_stress)
            .service(routes::metrics)
            .service(routes::health)
    })
    .bind(("0.0.0.0", args.port))?
    .run()
    .await?;
    Ok(())
}
