//! Shared fixtures for integration tests: record types, their relations
//! and an in-memory SQLite session with the schema created.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rust_data_mapper::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Name {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    #[serde(flatten)]
    pub name: Name,
    pub age: i64,
    pub company_id: Option<i64>,
    pub company: Option<Company>,
    pub wallet: Option<Wallet>,
    pub addresses: Vec<Address>,
    pub like_products: Vec<Product>,
}

impl Model for User {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("users")
                .field("id")
                .field("first_name")
                .field("middle_name")
                .field("last_name")
                .field("age")
                .field("company_id")
                .build()
        })
    }
}

impl User {
    pub fn new(id: &str, first_name: &str, age: i64) -> Self {
        Self {
            id: id.to_string(),
            name: Name {
                first_name: first_name.to_string(),
                middle_name: None,
                last_name: "Tester".to_string(),
            },
            age,
            ..Default::default()
        }
    }

    pub fn company() -> Relation<User, Company> {
        Relation::belongs_to(
            "company",
            "company_id",
            |u| u.company.as_ref(),
            |u, c| u.company = c,
        )
    }

    pub fn wallet() -> Relation<User, Wallet> {
        Relation::has_one("wallet", "user_id", |u| u.wallet.as_ref(), |u, w| u.wallet = w)
    }

    pub fn addresses() -> Relation<User, Address> {
        Relation::has_many(
            "addresses",
            "user_id",
            |u| u.addresses.as_slice(),
            |u, a| u.addresses = a,
        )
    }

    pub fn like_products() -> Relation<User, Product> {
        Relation::many_to_many(
            "like_products",
            JoinTable::new("user_like_product", "user_id", "product_id"),
            |u| u.like_products.as_slice(),
            |u, p| u.like_products = p,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub users: Vec<User>,
}

impl Company {
    pub fn users() -> Relation<Company, User> {
        Relation::has_many("users", "company_id", |c| c.users.as_slice(), |c, u| c.users = u)
    }
}

impl Model for Company {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("companies")
                .field("id")
                .auto_increment()
                .field("name")
                .build()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Wallet {
    pub id: String,
    pub user_id: Option<String>,
    pub balance: f64,
}

impl Model for Wallet {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("wallets")
                .field("id")
                .field("user_id")
                .field("balance")
                .build()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub id: i64,
    pub user_id: Option<String>,
    pub city: String,
    pub deleted_at: Option<String>,
}

impl Model for Address {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("addresses")
                .field("id")
                .auto_increment()
                .field("user_id")
                .field("city")
                .field("deleted_at")
                .soft_delete()
                .build()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
}

impl Model for Product {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("products")
                .field("id")
                .field("name")
                .field("price")
                .build()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserLog {
    pub id: i64,
    pub user_id: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model for UserLog {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("user_logs")
                .field("id")
                .auto_increment()
                .field("user_id")
                .field("action")
                .field("created_at")
                .auto_create_time()
                .field("updated_at")
                .auto_update_time()
                .build()
        })
    }
}

const SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE companies (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
    "CREATE TABLE users (
        id TEXT PRIMARY KEY,
        first_name TEXT NOT NULL,
        middle_name TEXT,
        last_name TEXT NOT NULL,
        age INTEGER NOT NULL,
        company_id INTEGER REFERENCES companies(id)
    )",
    "CREATE TABLE wallets (
        id TEXT PRIMARY KEY,
        user_id TEXT REFERENCES users(id),
        balance REAL NOT NULL
    )",
    "CREATE TABLE addresses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT REFERENCES users(id),
        city TEXT NOT NULL,
        deleted_at TEXT
    )",
    "CREATE TABLE products (id TEXT PRIMARY KEY, name TEXT NOT NULL, price REAL NOT NULL)",
    "CREATE TABLE user_like_product (
        user_id TEXT NOT NULL REFERENCES users(id),
        product_id TEXT NOT NULL REFERENCES products(id),
        PRIMARY KEY (user_id, product_id)
    )",
    "CREATE TABLE user_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        action TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
];

/// In-memory session with every fixture table created
pub async fn session() -> Session {
    init_tracing();
    let session = ConnectionBuilder::new(DatabaseType::Sqlite)
        .connect()
        .await
        .expect("Failed to connect");
    for sql in SCHEMA_SQL {
        session.exec(sql, args![]).await.expect("Failed to create table");
    }
    session
}

pub fn product(id: &str, name: &str, price: f64) -> Product {
    Product {
        id: id.to_string(),
        name: name.to_string(),
        price,
    }
}

pub fn wallet(id: &str, balance: f64) -> Wallet {
    Wallet {
        id: id.to_string(),
        user_id: None,
        balance,
    }
}

pub fn company(name: &str) -> Company {
    Company {
        name: name.to_string(),
        ..Default::default()
    }
}

pub fn address(city: &str) -> Address {
    Address {
        city: city.to_string(),
        ..Default::default()
    }
}
