// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! ### mysql_session
//! Client-side MySQL protocol session: framing, handshake, statement execution and streamed,
//! byte-limited result sets.
//!
//! #### Install
//!
//! ```toml
//! [dependencies]
//! mysql_session = "*"
//! ```
//!
//! #### Example
//!
//! ```rust,no_run
//! use mysql_session::{prelude::*, Conn, OptsBuilder, Value};
//!
//! # fn main() -> mysql_session::Result<()> {
//! let opts = OptsBuilder::new()
//!     .ip_or_hostname(Some("127.0.0.1"))
//!     .user(Some("root"))
//!     .pass(Some("password"))
//!     .db_name(Some("mysql"))
//!     // stop streaming a result set once it grew past a fifth of the heap
//!     .max_result_buffer(Some("20pct"));
//! let mut conn = Conn::new(opts)?;
//!
//! conn.query_drop("CREATE TEMPORARY TABLE payment (customer_id int, amount int)")?;
//! let stmt = conn.prep("INSERT INTO payment (customer_id, amount) VALUES (?, ?)")?;
//! conn.exec_batch(&stmt, vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3), Value::Int(4)]])?;
//!
//! let mut result = conn.query_iter("SELECT customer_id, amount FROM payment")?;
//! for row in result.by_ref() {
//!     let row = row?;
//!     println!("{:?}", row.get(0));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! #### Limits
//!
//! * `max_allowed_packet` bounds outgoing packets. Unless set explicitly it is taken from the
//!   server after authentication.
//! * `max_result_buffer` bounds the row bytes streamed per result set. It accepts plain bytes
//!   (`1000`), `K`/`M`/`G` suffixes and heap percentages (`50p`, `50pct`, `50percent`), and is
//!   clamped to 90% of the heap.
//!
//! Both live in [`conf::RuntimeProperties`], available through `Conn::properties`. A change
//! applies to statements issued afterwards.
//!
//! #### Events
//!
//! Noteworthy conditions (a clamped limit, an exceeded limit, an auth plugin switch, a discarded
//! row) are reported to an [`events::EventSink`]. The default sink forwards them to `tracing`.

pub mod conf;
mod conn;
pub mod error;
pub mod events;
mod io;
mod packet;
mod packets;
pub mod proto;
mod row;

#[doc(inline)]
pub use mysql_common::constants as consts;

#[doc(inline)]
pub use crate::conn::auth::{AuthAction, AuthContext, AuthPlugin, AuthPluginRegistry};
#[doc(inline)]
pub use crate::conn::cancel::CancelToken;
#[doc(inline)]
pub use crate::conn::opts::{Opts, OptsBuilder};
#[doc(inline)]
pub use crate::conn::query_result::{QueryResult, ResultSet, SetColumns};
#[doc(inline)]
pub use crate::conn::stmt::Statement;
#[doc(inline)]
pub use crate::conn::Conn;
#[doc(inline)]
pub use crate::error::{DriverError, Error, MySqlError, Result, UrlError};
#[doc(inline)]
pub use crate::io::{Stream, Transport};
#[doc(inline)]
pub use crate::packets::Column;
#[doc(inline)]
pub use crate::row::Row;
#[doc(inline)]
pub use mysql_common::params::Params;
#[doc(inline)]
pub use mysql_common::value::convert::{from_value, from_value_opt, FromValueError};
#[doc(inline)]
pub use mysql_common::value::Value;

pub mod prelude {
    #[doc(inline)]
    pub use crate::conf::{ModifiableProperty, ReadableProperty};
    #[doc(inline)]
    pub use crate::conn::queryable::{AsStatement, Queryable};
    #[doc(inline)]
    pub use mysql_common::value::convert::{FromValue, ToValue};
}
