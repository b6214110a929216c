//! Basic data-mapping example
//!
//! This example demonstrates basic record operations including:
//! - Connecting and creating a table
//! - Creating records (single and batched)
//! - Querying with conditions, ordering and paging
//! - Updating, upserting and soft-deleting
//!
//! Run with: cargo run --example basic_usage

use rust_data_mapper::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Member {
    id: i64,
    username: String,
    email: String,
    age: i64,
    balance: f64,
    created_at: String,
    deleted_at: Option<String>,
}

impl Model for Member {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("members")
                .field("id")
                .auto_increment()
                .field("username")
                .field("email")
                .field("age")
                .field("balance")
                .field("created_at")
                .auto_create_time()
                .field("deleted_at")
                .soft_delete()
                .build()
        })
    }
}

#[derive(Debug, Deserialize)]
struct Summary {
    username: String,
    age: i64,
}

fn member(username: &str, age: i64, balance: f64) -> Member {
    Member {
        username: username.to_string(),
        email: format!("{}@example.com", username),
        age,
        balance,
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Rust Data Mapper - Basic Usage Example ===\n");

    // Connect to an in-memory SQLite database
    println!("1. Connecting to database...");
    let session = ConnectionBuilder::new(DatabaseType::Sqlite).connect().await?;
    println!("   ✓ Connected\n");

    println!("2. Creating table...");
    session
        .exec(
            "CREATE TABLE members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL,
                age INTEGER NOT NULL,
                balance REAL NOT NULL,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            )",
            args![],
        )
        .await?;
    println!("   ✓ Table created\n");

    println!("3. Creating records...");
    let mut alice = member("alice", 30, 1500.50);
    session.create(&mut alice).await?;
    println!("   ✓ alice has id {} (created {})", alice.id, alice.created_at);

    let mut others = vec![
        member("bob", 25, 2300.75),
        member("charlie", 35, 980.25),
        member("diana", 28, 3200.00),
    ];
    let inserted = session.create_batch(&mut others).await?;
    println!("   ✓ {} more members inserted\n", inserted);

    println!("4. Querying...");
    let found = session
        .query::<Member>()
        .where_eq("username", "bob")
        .first()
        .await?;
    println!("   bob: {:?}", found);

    let adults = session
        .query::<Member>()
        .where_sql("age >= ? AND balance > ?", args![28, 1000.0])
        .order("age desc")
        .find()
        .await?;
    for m in &adults {
        println!("   {} ({}), balance {:.2}", m.username, m.age, m.balance);
    }

    let summaries: Vec<Summary> = session
        .query::<Member>()
        .select(&["username", "age"])
        .order("username")
        .limit(2)
        .offset(1)
        .scan()
        .await?;
    println!("   page 2 of 2-per-page: {:?}\n", summaries);

    println!("5. Updating...");
    let changed = session
        .query::<Member>()
        .where_eq("username", "charlie")
        .updates(Changes::new().set("age", 36).set("balance", 1000.0))
        .await?;
    println!("   ✓ {} row(s) updated", changed);

    alice.balance += 100.0;
    session.save(&mut alice).await?;
    println!("   ✓ alice saved with balance {:.2}\n", alice.balance);

    println!("6. Soft deleting...");
    session.delete(&mut alice).await?;
    println!("   alice deleted at {:?}", alice.deleted_at);
    println!(
        "   visible: {}, including deleted: {}\n",
        session.query::<Member>().count().await?,
        session.query::<Member>().unscoped().count().await?
    );

    println!("7. Handling errors...");
    match session
        .query::<Member>()
        .where_eq("username", "nobody")
        .first()
        .await
    {
        Err(e) if e.is_not_found() => println!("   ✓ not found: {}", e),
        other => println!("   unexpected: {:?}", other),
    }
    let mut duplicate = member("bob", 99, 0.0);
    match session.create(&mut duplicate).await {
        Err(e) if e.is_constraint_violation() => println!("   ✓ constraint: {}", e),
        other => println!("   unexpected: {:?}", other),
    }

    println!("\n=== Example completed successfully ===");
    Ok(())
}
