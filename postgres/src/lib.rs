//! `PostgreSQL` durable ledger for migrated coupons.
//!
//! Implements [`CouponLedger`](coupon_core::ledger::CouponLedger) on top of a
//! single `coupons` table whose `(coupon_id, member_id)` pair is unique. Every
//! write is one transaction, so a failure leaves no partial row behind and a
//! repeated migration of the same coupon is a no-op.
//!
//! # Example
//!
//! ```ignore
//! use coupon_postgres::PostgresCouponLedger;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let ledger = PostgresCouponLedger::connect(
//!         "postgres://localhost/coupons",
//!         10,
//!         std::time::Duration::from_secs(3),
//!     )
//!     .await?;
//!     ledger.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod ledger;

pub use ledger::PostgresCouponLedger;
