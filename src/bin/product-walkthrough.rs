//! Runs the full product lifecycle inside one trace: create, read by id,
//! read by code, update one field, update several fields, soft delete.
//!
//! Run with: cargo run --bin product-walkthrough

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::Instrument;

use product_tracing::monitor::Monitor;
use product_tracing::service::{AddForm, GetQuery, ProductService};
use product_tracing::store::{self, ProductChanges, SeaOrmStore};
use product_tracing::{ServiceConfig, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "product-walkthrough")]
#[command(about = "Exercise every store operation inside a single trace", long_about = None)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite::memory:")]
    database_url: String,

    #[arg(long, env = "PRODUCT_APP_NAME", default_value = "GORM App")]
    app_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    product_tracing::logging::init("info,product_tracing=debug", false);

    let db = store::connect(&cli.database_url, TracingConfig::development())
        .await
        .with_context(|| format!("connecting to {}", cli.database_url))?;
    store::migrate(&db).await?;

    let store = Arc::new(SeaOrmStore::new(db));
    let service = ProductService::new(store.clone(), ServiceConfig::default());
    let monitor = Monitor::logging(cli.app_name);
    let trace = monitor.start_background_trace("GORM Operation");

    let created = service
        .add(&trace, &AddForm::new("D42", "Widget", "100"))
        .await?;

    let segment = trace.start_segment("find-by-id");
    let by_id = store
        .find_by_id(created.id)
        .instrument(segment.span().clone())
        .await?;
    segment.end();
    tracing::info!(found = by_id.is_some(), id = created.id, "Read by primary key");

    let by_code = service.get(&trace, &GetQuery::by_code("D42")).await?;

    let segment = trace.start_segment("update-product");
    let updated = async {
        store.update_price(by_code.id, 200).await?;
        store
            .update_fields(
                by_code.id,
                ProductChanges {
                    code: Some("F42".into()),
                    price: Some(200),
                    ..ProductChanges::default()
                },
            )
            .await
    }
    .instrument(segment.span().clone())
    .await?;
    segment.end();
    tracing::info!(code = %updated.code, price = updated.price, "Product updated");

    let segment = trace.start_segment("delete-product");
    let deleted = store
        .soft_delete(updated.id)
        .instrument(segment.span().clone())
        .await?;
    segment.end();
    tracing::info!(deleted, remaining = store.count().await?, "Product deleted");

    let finished = monitor.finish(trace, 200);
    tracing::info!(
        segments = finished.segments.len(),
        errors = finished.errors.len(),
        "Walkthrough finished"
    );
    Ok(())
}
