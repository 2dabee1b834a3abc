//! # Seed Data Generator
//!
//! Populates the database with demo reference data for development.
//!
//! ## Usage
//! ```bash
//! # 200 products, 20 customers, 4 suppliers (default)
//! cargo run -p keystone-db --bin seed
//!
//! # Custom product count
//! cargo run -p keystone-db --bin seed -- --count 1000
//!
//! # Specify database path
//! cargo run -p keystone-db --bin seed -- --db ./data/keystone.db
//! ```
//!
//! ## Generated Data
//! - Products across hardware categories, SKU `{CATEGORY}-{ITEM}-{INDEX}`
//! - Customers; every third one on a credit account with a limit
//! - A handful of suppliers

use std::env;
use std::path::PathBuf;

use keystone_core::Money;
use keystone_db::{BackOffice, KeystoneConfig, NewCustomer, NewProduct, NewSupplier};

/// Product categories for realistic test data
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "FIX",
        &[
            "Hex Bolt",
            "Coach Screw",
            "Wall Plug",
            "Washer",
            "Wing Nut",
            "Anchor Bolt",
            "Rivet",
            "Cable Tie",
        ],
    ),
    (
        "BRK",
        &[
            "Angle Bracket",
            "Shelf Bracket",
            "Corner Brace",
            "Joist Hanger",
            "Mending Plate",
            "Post Base",
        ],
    ),
    (
        "PLM",
        &[
            "Ball Valve",
            "Elbow Joint",
            "Tee Piece",
            "Compression Fitting",
            "Pipe Clip",
            "Tap Washer",
        ],
    ),
    (
        "ELC",
        &[
            "Junction Box",
            "Cable Gland",
            "Light Switch",
            "Plug Socket",
            "Conduit",
            "Fuse",
        ],
    ),
];

/// Size variants with price add-on in cents
const SIZES: &[(&str, i64)] = &[
    ("M6", 0),
    ("M8", 150),
    ("M10", 300),
    ("M12", 500),
    ("Bulk 50", 2_500),
];

const SUPPLIERS: &[&str] = &[
    "Highveld Fasteners",
    "Cape Fittings",
    "Durban Electrical Supply",
    "Karoo Steelworks",
];

const CUSTOMER_COUNT: usize = 20;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Keystone Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: from config)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = KeystoneConfig::load(None)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    println!("Keystone Seed Data Generator");
    println!("============================");
    println!("Database: {}", config.database.path.display());
    println!("Products: {}", count);
    println!();

    let office = BackOffice::open(config).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let mut conn = office.database().pool().acquire().await?;
    let existing = keystone_db::repository::ProductRepository::new(&mut conn)
        .count()
        .await?;
    drop(conn);
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let start = std::time::Instant::now();

    for name in SUPPLIERS {
        office
            .create_supplier(NewSupplier {
                name: name.to_string(),
                email: Some(format!("orders@{}.test", slug(name))),
                phone: None,
            })
            .await?;
    }
    println!("✓ Created {} suppliers", SUPPLIERS.len());

    for index in 0..CUSTOMER_COUNT {
        let on_account = index % 3 == 0;
        office
            .create_customer(NewCustomer {
                name: format!("Customer {:02}", index + 1),
                email: format!("buyer{:02}@example.test", index + 1),
                company: Some(format!("Workshop {:02} (Pty) Ltd", index + 1)),
                payment_terms_days: on_account.then_some(30 + (index as u32 % 3) * 15),
                credit_limit: on_account.then(|| Money::from_cents(5_000_000)),
                ..Default::default()
            })
            .await?;
    }
    println!("✓ Created {} customers", CUSTOMER_COUNT);

    println!();
    println!("Generating products...");
    let mut generated = 0;

    'outer: for (category_idx, (category_code, items)) in CATEGORIES.iter().enumerate() {
        for (item_idx, item) in items.iter().enumerate() {
            for (size_idx, (size, price_addon)) in SIZES.iter().enumerate() {
                if generated >= count {
                    break 'outer;
                }

                let seed = category_idx * 1000 + item_idx * 20 + size_idx;
                let input = generate_product(category_code, item, size, *price_addon, seed);
                let sku = input.sku.clone();

                if let Err(e) = office.create_product(input).await {
                    eprintln!("Failed to insert {}: {}", sku, e);
                    continue;
                }

                generated += 1;
                if generated % 50 == 0 {
                    println!("  Generated {} products...", generated);
                }
            }
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("✓ Generated {} products in {:?}", generated, elapsed);

    let lookup = office.lookup();
    if let Some(first) = lookup.product("FIX-HEX-000").await? {
        println!("  Lookup FIX-HEX-000: {} at {}", first.name, first.unit_price);
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

fn slug(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}

/// Builds one product input with realistic data.
fn generate_product(
    category: &str,
    item: &str,
    size: &str,
    price_addon: i64,
    seed: usize,
) -> NewProduct {
    let code: String = item
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(3)
        .collect::<String>()
        .to_uppercase();
    let sku = format!("{}-{}-{:03}", category, code, seed);

    // R4.99 - R44.99 plus size
    let base_price = 499 + ((seed * 37) % 4000) as i64;

    NewProduct {
        sku,
        name: format!("{} {}", item, size),
        unit_price: Money::from_cents(base_price + price_addon),
        stock_quantity: (seed % 101) as i64,
    }
}
