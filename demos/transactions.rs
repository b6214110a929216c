//! Transaction example
//!
//! This example demonstrates units of work including:
//! - Closure transactions that commit on success
//! - Rollback when the body fails
//! - Manual begin / commit with a row lock
//! - Nested transactions
//!
//! Run with: cargo run --example transactions

use rust_data_mapper::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Account {
    id: i64,
    name: String,
    balance: f64,
}

impl Model for Account {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("accounts")
                .field("id")
                .field("name")
                .field("balance")
                .build()
        })
    }
}

/// Move `amount` between two accounts inside the given transaction
async fn transfer(tx: &Session, from: i64, to: i64, amount: f64) -> Result<()> {
    let source = tx
        .query::<Account>()
        .where_eq("id", from)
        .for_update()
        .first()
        .await?;
    let target = tx
        .query::<Account>()
        .where_eq("id", to)
        .for_update()
        .first()
        .await?;

    // The CHECK constraint rejects overdrafts
    tx.query::<Account>()
        .where_eq("id", from)
        .update("balance", source.balance - amount)
        .await?;
    tx.query::<Account>()
        .where_eq("id", to)
        .update("balance", target.balance + amount)
        .await?;
    Ok(())
}

async fn print_balances(session: &Session) -> Result<()> {
    println!("   Current balances:");
    for account in session.query::<Account>().order("id").find().await? {
        println!("   - {}: ${:.2}", account.name, account.balance);
    }
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Rust Data Mapper - Transaction Example ===\n");

    let session = ConnectionBuilder::new(DatabaseType::Sqlite).connect().await?;

    println!("1. Setting up accounts table...");
    session
        .exec(
            "CREATE TABLE accounts (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                balance REAL NOT NULL CHECK(balance >= 0)
            )",
            args![],
        )
        .await?;
    let mut accounts: Vec<Account> = [(1, "Alice", 1000.0), (2, "Bob", 500.0), (3, "Charlie", 750.0)]
        .into_iter()
        .map(|(id, name, balance)| Account {
            id,
            name: name.to_string(),
            balance,
        })
        .collect();
    session.create_batch(&mut accounts).await?;
    println!("   ✓ Accounts created\n");
    print_balances(&session).await?;

    println!("2. Successful transfer (Alice → Bob, $200)...");
    session
        .transaction(|tx| async move { transfer(&tx, 1, 2, 200.0).await })
        .await?;
    println!("   ✓ Committed");
    print_balances(&session).await?;

    println!("3. Failed transfer (Bob → Charlie, $5000)...");
    let result = session
        .transaction(|tx| async move { transfer(&tx, 2, 3, 5000.0).await })
        .await;
    match result {
        Ok(()) => println!("   unexpected success"),
        Err(e) => println!("   ✓ Rolled back: {}", e),
    }
    print_balances(&session).await?;

    println!("4. Manual transaction...");
    let tx = session.begin().await?;
    let mut charlie = tx
        .query::<Account>()
        .where_eq("id", 3)
        .for_update()
        .first()
        .await?;
    charlie.balance += 50.0;
    tx.save(&mut charlie).await?;
    tx.commit().await?;
    println!("   ✓ Charlie received a $50 bonus");
    print_balances(&session).await?;

    println!("5. Nested transaction...");
    let outcome = session
        .transaction(|tx| async move {
            transfer(&tx, 1, 3, 100.0).await?;
            tx.transaction(|inner| async move { transfer(&inner, 3, 2, 25.0).await })
                .await
        })
        .await;
    println!("   ✓ Outer and inner committed together: {:?}", outcome.is_ok());
    print_balances(&session).await?;

    println!("6. Dropping an unfinished transaction...");
    {
        let tx = session.begin().await?;
        tx.query::<Account>()
            .where_eq("id", 1)
            .update("balance", 0.0)
            .await?;
        // tx goes out of scope without commit
    }
    println!("   ✓ Rolled back on drop");
    print_balances(&session).await?;

    println!("=== Example completed successfully ===");
    Ok(())
}
