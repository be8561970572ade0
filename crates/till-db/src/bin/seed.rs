//! # Development Seed
//!
//! Fills a local store with a catalog and, optionally, a backlog of
//! offline sales so the sync engine has something to drain.
//!
//! ## Usage
//! ```bash
//! # 500 cached products (default)
//! cargo run -p till-db --bin seed
//!
//! # Custom catalog size plus 12 queued sales
//! cargo run -p till-db --bin seed -- --count 2000 --sales 12
//!
//! # Specify database path and tenant
//! cargo run -p till-db --bin seed -- --db ./data/till.db --tenant demo
//! ```
//!
//! Log level follows `RUST_LOG` (default `info,till=debug,sqlx=warn`).

use std::env;

use till_core::{CatalogItem, Money, NewQueuedSale, PaymentMethod, SaleLine};
use till_db::{setting_keys, Database, DbConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Catalog families for realistic names and codes.
const FAMILIES: &[(&str, &str, &[&str])] = &[
    ("BEB", "bebidas", &["Agua", "Refresco Cola", "Jugo Naranja", "Te Helado", "Cafe Frio"]),
    ("SNK", "botanas", &["Papas Sal", "Cacahuates", "Galletas", "Palomitas", "Chocolate"]),
    ("LAC", "lacteos", &["Leche Entera", "Yogur", "Queso Fresco", "Mantequilla", "Crema"]),
    ("ABR", "abarrotes", &["Arroz", "Frijol", "Azucar", "Aceite", "Sal"]),
];

const SIZES: &[(&str, i64)] = &[
    ("250g", 0),
    ("500g", 120),
    ("1kg", 260),
    ("355ml", 0),
    ("600ml", 80),
    ("1L", 150),
    ("2L", 290),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,till=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 500;
    let mut sales: usize = 0;
    let mut db_path = String::from("./till_dev.db");
    let mut tenant = String::from("demo-tenant");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" if i + 1 < args.len() => {
                count = args[i + 1].parse().unwrap_or(count);
                i += 1;
            }
            "--sales" | "-s" if i + 1 < args.len() => {
                sales = args[i + 1].parse().unwrap_or(sales);
                i += 1;
            }
            "--db" | "-d" if i + 1 < args.len() => {
                db_path = args[i + 1].clone();
                i += 1;
            }
            "--tenant" | "-t" if i + 1 < args.len() => {
                tenant = args[i + 1].clone();
                i += 1;
            }
            "--help" | "-h" => {
                println!("Till POS seed");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>     Cached products to generate (default: 500)");
                println!("  -s, --sales <N>     Offline sales to queue (default: 0)");
                println!("  -d, --db <PATH>     Database file path (default: ./till_dev.db)");
                println!("  -t, --tenant <ID>   Tenant for queued sales (default: demo-tenant)");
                println!("  -h, --help          Show this help message");
                return Ok(());
            }
            other => warn!(arg = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let db = Database::new(DbConfig::new(&db_path)).await?;
    info!(path = %db_path, "Local store ready");

    let catalog = generate_catalog(count);
    let written = db.products().replace_all(&catalog).await?;
    info!(products = written, "Catalog cached");

    if sales > 0 {
        for n in 0..sales {
            let sale = generate_sale(&catalog, n);
            db.queue().enqueue(sale, Some(&tenant)).await?;
        }
        db.settings().set(setting_keys::LAST_TENANT_ID, &tenant).await?;
        info!(sales, tenant = %tenant, "Offline sales queued");
    }

    let sample = db.products().search("agua").await?;
    info!(
        hits = sample.results.len(),
        pending = db.queue().count_pending().await?,
        "Seed complete"
    );

    db.close().await;
    Ok(())
}

/// Generates `count` catalog items cycling through families and sizes.
fn generate_catalog(count: usize) -> Vec<CatalogItem> {
    let mut items = Vec::with_capacity(count);

    'outer: for round in 0.. {
        for (family_code, category, names) in FAMILIES {
            for (name_idx, name) in names.iter().enumerate() {
                for (size_name, price_addon) in SIZES {
                    if items.len() >= count {
                        break 'outer;
                    }
                    let seq = items.len();
                    items.push(CatalogItem {
                        id: format!("prod-{seq:05}"),
                        name: format!("{name} {size_name}"),
                        price: Money::from_cents(1_500 + ((seq * 37) % 4_000) as i64 + price_addon),
                        code: Some(format!("750{family_code}{round:02}{name_idx:02}{seq:05}")),
                        stock: (seq % 60) as i64,
                        category: Some((*category).to_string()),
                    });
                }
            }
        }
    }

    items
}

/// Generates the `n`th offline sale from one to three catalog items.
fn generate_sale(catalog: &[CatalogItem], n: usize) -> NewQueuedSale {
    let lines = (0..=(n % 3))
        .filter_map(|k| catalog.get((n * 7 + k * 13) % catalog.len().max(1)))
        .map(|item| SaleLine::new(item.id.clone(), 1 + (n % 4) as i64, item.price))
        .collect();

    let method = match n % 3 {
        0 => PaymentMethod::Cash,
        1 => PaymentMethod::Card,
        _ => PaymentMethod::Transfer,
    };

    NewQueuedSale::new(format!("cashier-{}", n % 2 + 1), method, lines)
}
