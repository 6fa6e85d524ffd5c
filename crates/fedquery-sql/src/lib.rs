// SPDX-License-Identifier: Apache-2.0

//! SQL handling for fedquery: restricted parsing of incoming queries and
//! generation of remote and local SQL text.

pub mod parser;
pub mod render;

pub use parser::{parse_query, ColumnRef, JoinCondition, ParsedQuery, Predicate, TableRef};
pub use render::{
    chunk_keys, forward_sql, key_filter_sql, local_join_sql, quote_ident, remote_scan_sql,
    sql_literal,
};
