//! Integration tests for the data-mapping layer
//!
//! These tests run every operation against an in-memory SQLite database:
//! - Record CRUD and conflict handling
//! - Soft delete scoping
//! - Transactions (commit, rollback, nesting, row locks)
//! - Association loading by preload and by join
//! - Association mode

#[cfg(feature = "sqlite")]
mod common;

#[cfg(feature = "sqlite")]
mod sqlite_tests {
    use super::common::*;
    use rust_data_mapper::prelude::*;
    use serde::Deserialize;
    use tokio::time::Duration;

    /// Alice has everything, Bob has an address and a liked product, Carol
    /// has nothing
    async fn seeded() -> Result<(Session, User, User, User)> {
        let session = session().await;

        let mut alice = User::new("1", "Alice", 30);
        alice.company = Some(company("Acme"));
        alice.wallet = Some(wallet("w1", 100.0));
        alice.addresses = vec![address("Jakarta"), address("Bandung")];
        alice.like_products = vec![product("p1", "Keyboard", 10.0), product("p2", "Mouse", 5.0)];
        session
            .create_with_associations(
                &mut alice,
                &[
                    &User::company(),
                    &User::wallet(),
                    &User::addresses(),
                    &User::like_products(),
                ],
            )
            .await?;

        let mut bob = User::new("2", "Bob", 25);
        bob.addresses = vec![address("Surabaya")];
        bob.like_products = vec![product("p2", "Mouse", 5.0)];
        session
            .create_with_associations(&mut bob, &[&User::addresses(), &User::like_products()])
            .await?;

        let mut carol = User::new("3", "Carol", 22);
        session.create(&mut carol).await?;

        Ok((session, alice, bob, carol))
    }

    #[tokio::test]
    async fn test_create_and_find() -> Result<()> {
        let session = session().await;

        let mut user = User::new("1", "Alice", 30);
        user.name.middle_name = Some("M".to_string());
        assert_eq!(session.create(&mut user).await?, 1);

        let found = session.query::<User>().where_eq("id", "1").first().await?;
        assert_eq!(found, user);

        let err = session
            .query::<User>()
            .where_eq("id", "404")
            .first()
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = session.create(&mut user).await.unwrap_err();
        assert!(err.is_constraint_violation());
        Ok(())
    }

    #[tokio::test]
    async fn test_conditions() -> Result<()> {
        let (session, ..) = seeded().await?;

        let count = session
            .query::<User>()
            .where_sql("first_name LIKE ?", args!["A%"])
            .or_cond(Condition::eq("age", 25))
            .count()
            .await?;
        assert_eq!(count, 2);

        let count = session
            .query::<User>()
            .not_cond(Condition::eq("first_name", "Alice"))
            .count()
            .await?;
        assert_eq!(count, 2);

        let count = session
            .query::<User>()
            .where_map(
                ConditionMap::new()
                    .eq("last_name", "Tester")
                    .any_of("id", ["1", "2"]),
            )
            .count()
            .await?;
        assert_eq!(count, 2);

        let example = User {
            age: 30,
            ..Default::default()
        };
        let found = session.query::<User>().where_model(&example)?.find().await?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "1");

        let ids: Vec<String> = session
            .query::<User>()
            .where_in("id", ["2", "3"])
            .order("age desc")
            .find()
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(ids, vec!["2", "3"]);

        let last = session.query::<User>().last().await?;
        assert_eq!(last.id, "3");

        let page = session
            .query::<User>()
            .order("id")
            .limit(1)
            .offset(1)
            .find()
            .await?;
        assert_eq!(page[0].id, "2");
        Ok(())
    }

    #[tokio::test]
    async fn test_projections_and_raw_sql() -> Result<()> {
        #[derive(Debug, Deserialize, PartialEq)]
        struct AgeRow {
            first_name: String,
            age: i64,
        }

        let (session, ..) = seeded().await?;

        let rows: Vec<AgeRow> = session
            .query::<User>()
            .select(&["first_name", "age"])
            .where_sql("age > ?", args![24])
            .order("age")
            .scan()
            .await?;
        assert_eq!(
            rows,
            vec![
                AgeRow {
                    first_name: "Bob".into(),
                    age: 25
                },
                AgeRow {
                    first_name: "Alice".into(),
                    age: 30
                },
            ]
        );

        let total: i64 = session
            .raw("SELECT SUM(age) AS total FROM users WHERE id IN ?", args![vec!["1", "2"]])
            .scan_one()
            .await?;
        assert_eq!(total, 55);

        let changed = session
            .exec("UPDATE users SET age = age + 1 WHERE id = ?", args!["3"])
            .await?;
        assert_eq!(changed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_updates() -> Result<()> {
        let (session, ..) = seeded().await?;

        let changed = session
            .query::<User>()
            .where_eq("id", "3")
            .updates(Changes::new().set("age", 23).set("first_name", "Caroline"))
            .await?;
        assert_eq!(changed, 1);
        let carol = session.query::<User>().where_eq("id", "3").first().await?;
        assert_eq!((carol.name.first_name.as_str(), carol.age), ("Caroline", 23));

        // Whole-table updates and unknown columns are rejected
        let err = session.query::<User>().update("age", 1).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
        let err = session
            .query::<User>()
            .where_eq("id", "3")
            .update("nope", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert() -> Result<()> {
        let session = session().await;
        session.create(&mut User::new("1", "Alice", 30)).await?;

        let mut changed = User::new("1", "Alicia", 31);
        session
            .create_with(&mut changed, OnConflict::update_columns(["age"]))
            .await?;
        let stored = session.query::<User>().where_eq("id", "1").first().await?;
        assert_eq!((stored.name.first_name.as_str(), stored.age), ("Alice", 31));

        let mut ignored = User::new("1", "Bob", 99);
        session
            .create_with(&mut ignored, OnConflict::do_nothing())
            .await?;
        let stored = session.query::<User>().where_eq("id", "1").first().await?;
        assert_eq!(stored.age, 31);

        let mut saved = User::new("1", "Bob", 40);
        session.save(&mut saved).await?;
        let stored = session.query::<User>().where_eq("id", "1").first().await?;
        assert_eq!((stored.name.first_name.as_str(), stored.age), ("Bob", 40));

        let err = session
            .create_with(&mut saved, OnConflict::update_columns(["missing"]))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_generated_keys_and_timestamps() -> Result<()> {
        let session = session().await;

        let mut log = UserLog {
            user_id: "1".into(),
            action: "login".into(),
            ..Default::default()
        };
        session.create(&mut log).await?;
        assert!(log.id > 0);
        assert!(log.created_at.timestamp() > 0);
        let created_at = log.created_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        log.action = "logout".into();
        session.save(&mut log).await?;

        let stored = session
            .query::<UserLog>()
            .where_eq("id", log.id)
            .first()
            .await?;
        assert_eq!(stored.action, "logout");
        assert_eq!(stored.created_at, created_at);
        assert!(stored.updated_at > created_at);

        let mut batch: Vec<UserLog> = (0..5)
            .map(|i| UserLog {
                user_id: "1".into(),
                action: format!("step-{}", i),
                ..Default::default()
            })
            .collect();
        assert_eq!(session.create_batch(&mut batch).await?, 5);
        let mut ids: Vec<i64> = batch.iter().map(|l| l.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 5);
        assert!(ids.iter().all(|id| *id > log.id));
        Ok(())
    }

    #[tokio::test]
    async fn test_soft_delete() -> Result<()> {
        let session = session().await;
        let mut jakarta = address("Jakarta");
        let mut bandung = address("Bandung");
        session.create(&mut jakarta).await?;
        session.create(&mut bandung).await?;

        assert_eq!(session.delete(&mut jakarta).await?, 1);
        assert!(jakarta.deleted_at.is_some());
        assert_eq!(session.query::<Address>().count().await?, 1);
        assert_eq!(session.query::<Address>().unscoped().count().await?, 2);
        assert_eq!(session.unscoped().query::<Address>().count().await?, 2);

        let deleted = session
            .query::<Address>()
            .where_eq("city", "Bandung")
            .delete()
            .await?;
        assert_eq!(deleted, 1);
        assert_eq!(session.query::<Address>().count().await?, 0);

        // Unscoped deletes remove the row
        session.unscoped().delete(&mut jakarta).await?;
        assert_eq!(session.query::<Address>().unscoped().count().await?, 1);

        let err = session.delete(&mut address("nowhere")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() -> Result<()> {
        let session = session().await;

        session
            .transaction(|tx| async move {
                tx.create(&mut User::new("1", "Alice", 30)).await?;
                tx.create(&mut User::new("2", "Bob", 25)).await?;
                Ok::<_, DatabaseError>(())
            })
            .await?;
        assert_eq!(session.query::<User>().count().await?, 2);

        let result = session
            .transaction(|tx| async move {
                tx.create(&mut User::new("3", "Carol", 22)).await?;
                Err::<(), _>(DatabaseError::other("boom"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(session.query::<User>().count().await?, 2);
        assert!(!session.in_transaction());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_statement_aborts_transaction() -> Result<()> {
        let session = session().await;
        session.create(&mut User::new("1", "Alice", 30)).await?;

        let tx = session.begin().await?;
        tx.create(&mut User::new("2", "Bob", 25)).await?;
        let err = tx.create(&mut User::new("1", "Again", 1)).await.unwrap_err();
        assert!(err.is_constraint_violation());

        let err = tx.query::<User>().count().await.unwrap_err();
        assert!(matches!(err, DatabaseError::TransactionAborted(_)));
        assert!(tx.commit().await.is_err());

        assert_eq!(session.query::<User>().count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_nested_transaction_failure_aborts_outer() -> Result<()> {
        let session = session().await;

        let outcome = session
            .transaction(|tx| async move {
                tx.create(&mut User::new("1", "Alice", 30)).await?;
                let inner = tx
                    .transaction(|inner| async move {
                        assert!(inner.in_transaction());
                        inner.create(&mut User::new("2", "Bob", 25)).await?;
                        Err::<(), _>(DatabaseError::other("inner failure"))
                    })
                    .await;
                assert!(inner.is_err());
                tx.create(&mut User::new("3", "Carol", 22)).await.map(|_| ())
            })
            .await;

        assert!(matches!(outcome, Err(DatabaseError::TransactionAborted(_))));
        assert_eq!(session.query::<User>().count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_manual_transaction_with_row_lock() -> Result<()> {
        let session = session().await;
        session.create(&mut User::new("1", "Alice", 30)).await?;

        let err = session
            .query::<User>()
            .for_update()
            .find()
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));

        let tx = session.begin().await?;
        let mut alice = tx
            .query::<User>()
            .where_eq("id", "1")
            .for_update()
            .first()
            .await?;
        alice.age += 1;
        tx.save(&mut alice).await?;
        tx.commit().await?;

        let stored = session.query::<User>().where_eq("id", "1").first().await?;
        assert_eq!(stored.age, 31);
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() -> Result<()> {
        let session = session().await;
        {
            let tx = session.begin().await?;
            tx.create(&mut User::new("1", "Alice", 30)).await?;
        }
        assert!(!session.database().in_transaction());
        assert_eq!(session.query::<User>().count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_constraint_violation_rolls_back_whole_transaction() -> Result<()> {
        let session = session().await;

        let outcome = session
            .transaction(|tx| async move {
                tx.create(&mut User::new("1", "Alice", 30)).await?;
                tx.create(&mut User::new("1", "Duplicate", 31)).await?;
                Ok::<_, DatabaseError>(())
            })
            .await;

        assert!(outcome.is_err_and(|err| err.is_constraint_violation()));
        assert!(!session.in_transaction());
        assert_eq!(session.query::<User>().count().await?, 0);
        let missing = session.query::<User>().where_eq("id", "1").first().await;
        assert!(matches!(missing, Err(DatabaseError::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_other_session_writes_wait_for_open_transaction() -> Result<()> {
        let session = session().await;

        let tx = session.begin().await?;
        tx.create(&mut User::new("1", "Alice", 30)).await?;

        let other = session.clone();
        let writer = tokio::spawn(async move {
            other.create(&mut User::new("2", "Bob", 25)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        tx.rollback().await?;
        writer.await.expect("Task panicked")?;

        let ids: Vec<String> = session
            .query::<User>()
            .find()
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(ids, vec!["2".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_second_begin_waits_for_first_transaction() -> Result<()> {
        let session = session().await;

        let first = session.begin().await?;
        first.create(&mut User::new("1", "Alice", 30)).await?;

        let other = session.clone();
        let second = tokio::spawn(async move {
            let tx = other.begin().await?;
            tx.create(&mut User::new("2", "Bob", 25)).await?;
            tx.commit().await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        first.commit().await?;
        second.await.expect("Task panicked")?;
        assert_eq!(session.query::<User>().count().await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_sessions() -> Result<()> {
        let session = session().await;

        let mut handles = vec![];
        for i in 0..10 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                let mut p = product(&format!("p{}", i), "Widget", f64::from(i));
                session.create(&mut p).await
            }));
        }
        for handle in handles {
            handle.await.expect("Task panicked")?;
        }

        assert_eq!(session.query::<Product>().count().await?, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_cascade_create() -> Result<()> {
        let (session, alice, ..) = seeded().await?;

        let company_id = alice.company_id.expect("company key set");
        assert_eq!(alice.company.as_ref().map(|c| c.id), Some(company_id));
        assert_eq!(
            alice.wallet.as_ref().and_then(|w| w.user_id.as_deref()),
            Some("1")
        );
        assert!(alice.addresses.iter().all(|a| a.id > 0));

        let links = session
            .raw("SELECT COUNT(*) AS n FROM user_like_product", args![])
            .scan_one::<i64>()
            .await?;
        assert_eq!(links, 3);
        assert_eq!(session.query::<Product>().count().await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_preload() -> Result<()> {
        let (session, ..) = seeded().await?;

        let users = session
            .query::<User>()
            .preload(User::company())
            .preload(User::wallet())
            .preload(User::addresses())
            .preload(User::like_products())
            .order("id")
            .find()
            .await?;
        assert_eq!(users.len(), 3);

        let alice = &users[0];
        assert_eq!(alice.company.as_ref().map(|c| c.name.as_str()), Some("Acme"));
        assert_eq!(alice.wallet.as_ref().map(|w| w.id.as_str()), Some("w1"));
        let cities: Vec<&str> = alice.addresses.iter().map(|a| a.city.as_str()).collect();
        assert_eq!(cities, vec!["Jakarta", "Bandung"]);
        let liked: Vec<&str> = alice.like_products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(liked, vec!["p1", "p2"]);

        let bob = &users[1];
        assert!(bob.company.is_none() && bob.wallet.is_none());
        assert_eq!(bob.addresses.len(), 1);
        assert_eq!(bob.like_products[0].id, "p2");

        let carol = &users[2];
        assert!(carol.addresses.is_empty() && carol.like_products.is_empty());

        let filtered = session
            .query::<User>()
            .where_eq("id", "1")
            .preload(User::addresses().filter(Condition::eq("city", "Bandung")))
            .first()
            .await?;
        assert_eq!(filtered.addresses.len(), 1);
        assert_eq!(filtered.addresses[0].city, "Bandung");

        let companies = session
            .query::<Company>()
            .preload(Company::users().nested(User::wallet()))
            .find()
            .await?;
        assert_eq!(companies[0].users.len(), 1);
        assert_eq!(
            companies[0].users[0].wallet.as_ref().map(|w| w.balance),
            Some(100.0)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_joins_match_preload() -> Result<()> {
        let (session, ..) = seeded().await?;

        let preloaded = session
            .query::<User>()
            .preload(User::company())
            .preload(User::wallet())
            .preload(User::addresses())
            .preload(User::like_products())
            .order("id")
            .find()
            .await?;

        let joined = session
            .query::<User>()
            .joins(User::company())
            .joins(User::wallet())
            .joins(User::addresses())
            .joins(User::like_products())
            .order("users.id")
            .order("addresses.id")
            .order("like_products.id")
            .find()
            .await?;
        assert_eq!(joined, preloaded);

        let counted = session
            .query::<User>()
            .joins(User::addresses())
            .count()
            .await?;
        assert_eq!(counted, 3);

        let with_wallet = session
            .query::<User>()
            .joins(User::wallet().inner())
            .find()
            .await?;
        assert_eq!(with_wallet.len(), 1);
        assert_eq!(with_wallet[0].id, "1");

        let bandung = session
            .query::<User>()
            .joins(User::addresses().on(Condition::eq("city", "Bandung")))
            .order("users.id")
            .find()
            .await?;
        assert_eq!(bandung.len(), 3);
        assert_eq!(bandung[0].addresses.len(), 1);
        assert!(bandung[1].addresses.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_soft_deleted_children_are_not_loaded() -> Result<()> {
        let (session, mut alice, ..) = seeded().await?;
        session.delete(&mut alice.addresses[0]).await?;

        let preloaded = session
            .query::<User>()
            .where_eq("id", "1")
            .preload(User::addresses())
            .first()
            .await?;
        let joined = session
            .query::<User>()
            .where_eq("users.id", "1")
            .joins(User::addresses())
            .first()
            .await?;
        assert_eq!(preloaded.addresses.len(), 1);
        assert_eq!(joined.addresses, preloaded.addresses);
        Ok(())
    }

    #[tokio::test]
    async fn test_limited_joins_keep_all_children() -> Result<()> {
        let (session, ..) = seeded().await?;

        let preloaded = session
            .query::<User>()
            .where_eq("id", "1")
            .preload(User::addresses())
            .preload(User::like_products())
            .first()
            .await?;
        let joined = session
            .query::<User>()
            .where_eq("users.id", "1")
            .joins(User::addresses())
            .joins(User::like_products())
            .order("addresses.id")
            .order("like_products.id")
            .first()
            .await?;
        assert_eq!(joined.addresses.len(), 2);
        assert_eq!(joined.like_products.len(), 2);
        assert_eq!(joined, preloaded);

        let taken = session
            .query::<User>()
            .where_eq("users.id", "1")
            .joins(User::addresses())
            .take()
            .await?;
        assert_eq!(taken.id, "1");
        assert_eq!(taken.addresses.len(), 2);

        let page = session
            .query::<User>()
            .joins(User::addresses())
            .order("users.id")
            .order("addresses.id")
            .limit(2)
            .find()
            .await?;
        let counts: Vec<(&str, usize)> = page
            .iter()
            .map(|u| (u.id.as_str(), u.addresses.len()))
            .collect();
        assert_eq!(counts, vec![("1", 2), ("2", 1)]);

        let rest = session
            .query::<User>()
            .joins(User::addresses())
            .order("users.id")
            .offset(1)
            .find()
            .await?;
        let ids: Vec<&str> = rest.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);

        let none = session
            .query::<User>()
            .joins(User::addresses())
            .offset(5)
            .find()
            .await?;
        assert!(none.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unscoped_preload_matches_unscoped_join() -> Result<()> {
        let (session, mut alice, ..) = seeded().await?;
        session.delete(&mut alice.addresses[0]).await?;

        let preloaded = session
            .query::<User>()
            .unscoped()
            .where_eq("id", "1")
            .preload(User::addresses())
            .first()
            .await?;
        let joined = session
            .query::<User>()
            .unscoped()
            .where_eq("users.id", "1")
            .joins(User::addresses())
            .order("addresses.id")
            .first()
            .await?;
        assert_eq!(preloaded.addresses.len(), 2);
        assert_eq!(joined.addresses, preloaded.addresses);
        assert!(preloaded.addresses[0].deleted_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_many_to_many_association_mode() -> Result<()> {
        let (session, _, _, mut carol) = seeded().await?;

        let mut assoc = session.association(&mut carol, User::like_products());
        assoc
            .append(&mut [product("p1", "Keyboard", 10.0), product("p3", "Monitor", 200.0)])
            .await?;
        assert_eq!(assoc.count().await?, 2);

        // Linking again keeps a single link row
        assoc.append(&mut [product("p1", "Keyboard", 10.0)]).await?;
        assert_eq!(assoc.count().await?, 2);

        assoc.replace(&mut [product("p3", "Monitor", 200.0)]).await?;
        let ids: Vec<String> = assoc.find().await?.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["p3"]);

        assert_eq!(assoc.delete(&[product("p3", "Monitor", 200.0)]).await?, 1);
        assert_eq!(assoc.count().await?, 0);

        assoc.append(&mut [product("p2", "Mouse", 5.0)]).await?;
        assert_eq!(assoc.clear().await?, 1);
        assert_eq!(assoc.count().await?, 0);
        drop(assoc);

        assert!(carol.like_products.is_empty());
        // Unlinking never deletes the related records
        assert_eq!(session.query::<Product>().count().await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_has_many_association_mode() -> Result<()> {
        let (session, _, _, mut carol) = seeded().await?;

        let mut assoc = session.association(&mut carol, User::addresses());
        assoc.append(&mut [address("Medan")]).await?;
        assert_eq!(assoc.count().await?, 1);

        assoc.replace(&mut [address("Bali")]).await?;
        let cities: Vec<String> = assoc.find().await?.into_iter().map(|a| a.city).collect();
        assert_eq!(cities, vec!["Bali"]);

        assert_eq!(assoc.clear().await?, 1);
        drop(assoc);
        assert!(carol.addresses.is_empty());

        let orphans = session
            .query::<Address>()
            .where_cond(Condition::is_null("user_id"))
            .count()
            .await?;
        assert_eq!(orphans, 2);

        let mut ghost = User::new("", "Ghost", 1);
        let err = session
            .association(&mut ghost, User::addresses())
            .append(&mut [address("Nowhere")])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_single_valued_association_mode() -> Result<()> {
        let (session, _, _, mut carol) = seeded().await?;

        let mut wallet_assoc = session.association(&mut carol, User::wallet());
        wallet_assoc.append(&mut [wallet("w2", 1.0)]).await?;
        wallet_assoc.append(&mut [wallet("w3", 2.0)]).await?;
        assert_eq!(wallet_assoc.count().await?, 1);
        drop(wallet_assoc);
        assert_eq!(carol.wallet.as_ref().map(|w| w.id.as_str()), Some("w3"));

        let w2 = session.query::<Wallet>().where_eq("id", "w2").first().await?;
        assert_eq!(w2.user_id, None);

        let mut company_assoc = session.association(&mut carol, User::company());
        company_assoc.append(&mut [company("Globex")]).await?;
        drop(company_assoc);
        assert!(carol.company_id.is_some());

        let mut company_assoc = session.association(&mut carol, User::company());
        assert_eq!(company_assoc.clear().await?, 1);
        drop(company_assoc);
        assert_eq!(carol.company_id, None);

        let stored = session.query::<User>().where_eq("id", "3").first().await?;
        assert_eq!(stored.company_id, None);
        Ok(())
    }
}
