//! Association example
//!
//! This example demonstrates associations between records:
//! - Creating a record together with its associations
//! - Preloading (with filters and nested preloads)
//! - Join-based loading
//! - Association mode (append, replace, delete, clear)
//!
//! Run with: cargo run --example associations

use rust_data_mapper::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Author {
    id: i64,
    name: String,
    profile: Option<Profile>,
    books: Vec<Book>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Profile {
    id: i64,
    author_id: Option<i64>,
    bio: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Book {
    id: i64,
    author_id: Option<i64>,
    title: String,
    tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Tag {
    id: String,
    label: String,
}

impl Model for Author {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("authors")
                .field("id")
                .auto_increment()
                .field("name")
                .build()
        })
    }
}

impl Model for Profile {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("profiles")
                .field("id")
                .auto_increment()
                .field("author_id")
                .field("bio")
                .build()
        })
    }
}

impl Model for Book {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("books")
                .field("id")
                .auto_increment()
                .field("author_id")
                .field("title")
                .build()
        })
    }
}

impl Model for Tag {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| Schema::builder("tags").field("id").field("label").build())
    }
}

impl Author {
    fn profile() -> Relation<Author, Profile> {
        Relation::has_one("profile", "author_id", |a| a.profile.as_ref(), |a, p| a.profile = p)
    }

    fn books() -> Relation<Author, Book> {
        Relation::has_many("books", "author_id", |a| a.books.as_slice(), |a, b| a.books = b)
    }
}

impl Book {
    fn tags() -> Relation<Book, Tag> {
        Relation::many_to_many(
            "tags",
            JoinTable::new("book_tags", "book_id", "tag_id"),
            |b| b.tags.as_slice(),
            |b, t| b.tags = t,
        )
    }
}

fn book(title: &str) -> Book {
    Book {
        title: title.to_string(),
        ..Default::default()
    }
}

fn tag(id: &str) -> Tag {
    Tag {
        id: id.to_string(),
        label: id.to_uppercase(),
    }
}

fn titles(books: &[Book]) -> Vec<&str> {
    books.iter().map(|b| b.title.as_str()).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Rust Data Mapper - Association Example ===\n");

    let session = ConnectionBuilder::new(DatabaseType::Sqlite).connect().await?;

    println!("1. Creating tables...");
    for sql in [
        "CREATE TABLE authors (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
        "CREATE TABLE profiles (id INTEGER PRIMARY KEY AUTOINCREMENT, \
         author_id INTEGER REFERENCES authors(id), bio TEXT NOT NULL)",
        "CREATE TABLE books (id INTEGER PRIMARY KEY AUTOINCREMENT, \
         author_id INTEGER REFERENCES authors(id), title TEXT NOT NULL)",
        "CREATE TABLE tags (id TEXT PRIMARY KEY, label TEXT NOT NULL)",
        "CREATE TABLE book_tags (book_id INTEGER NOT NULL, tag_id TEXT NOT NULL, \
         PRIMARY KEY (book_id, tag_id))",
    ] {
        session.exec(sql, args![]).await?;
    }
    println!("   ✓ Tables created\n");

    println!("2. Creating an author with profile and books...");
    let mut ursula = Author {
        name: "Ursula".into(),
        profile: Some(Profile {
            bio: "Writes about islands and wizards".into(),
            ..Default::default()
        }),
        books: vec![book("A Wizard of Earthsea"), book("The Dispossessed")],
        ..Default::default()
    };
    session
        .create_with_associations(&mut ursula, &[&Author::profile(), &Author::books()])
        .await?;
    println!(
        "   ✓ Author {} with {} books",
        ursula.id,
        ursula.books.len()
    );

    let mut terry = Author {
        name: "Terry".into(),
        ..Default::default()
    };
    session.create(&mut terry).await?;
    println!("   ✓ Author {} without books\n", terry.id);

    println!("3. Tagging books (association mode)...");
    let mut earthsea = ursula.books[0].clone();
    session
        .association(&mut earthsea, Book::tags())
        .append(&mut [tag("fantasy"), tag("classic")])
        .await?;
    let mut dispossessed = ursula.books[1].clone();
    session
        .association(&mut dispossessed, Book::tags())
        .append(&mut [tag("scifi"), tag("classic")])
        .await?;
    println!("   ✓ Tags linked\n");

    println!("4. Preloading...");
    let authors = session
        .query::<Author>()
        .preload(Author::profile())
        .preload(Author::books().nested(Book::tags()))
        .order("id")
        .find()
        .await?;
    for author in &authors {
        println!(
            "   {} | profile: {:?} | books: {:?}",
            author.name,
            author.profile.as_ref().map(|p| p.bio.as_str()),
            titles(&author.books)
        );
        for book in &author.books {
            let labels: Vec<&str> = book.tags.iter().map(|t| t.label.as_str()).collect();
            println!("     - {} {:?}", book.title, labels);
        }
    }

    let filtered = session
        .query::<Author>()
        .preload(Author::books().filter(Condition::like("title", "%Wizard%")))
        .first()
        .await?;
    println!("   books matching %Wizard%: {:?}\n", titles(&filtered.books));

    println!("5. Joining...");
    let joined = session
        .query::<Author>()
        .joins(Author::profile())
        .joins(Author::books())
        .order("authors.id")
        .order("books.id")
        .find()
        .await?;
    for author in &joined {
        println!("   {} has {} book(s)", author.name, author.books.len());
    }
    let with_profile = session
        .query::<Author>()
        .joins(Author::profile().inner())
        .count()
        .await?;
    println!("   authors with a profile: {}\n", with_profile);

    println!("6. Replacing and clearing...");
    let mut assoc = session.association(&mut terry, Author::books());
    assoc.append(&mut [book("Guards! Guards!")]).await?;
    assoc.replace(&mut [book("Small Gods")]).await?;
    println!("   Terry now has {} linked book(s)", assoc.count().await?);

    let unlinked = assoc.clear().await?;
    println!("   ✓ {} book(s) unlinked", unlinked);
    drop(assoc);

    let orphans = session
        .query::<Book>()
        .where_cond(Condition::is_null("author_id"))
        .count()
        .await?;
    println!("   books without an author (kept, not deleted): {}", orphans);

    let removed = session
        .association(&mut earthsea, Book::tags())
        .delete(&[tag("classic")])
        .await?;
    println!("   ✓ {} tag link(s) removed from {}", removed, earthsea.title);

    println!("\n=== Example completed successfully ===");
    Ok(())
}
