// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::borrow::Cow;

use mysql_common::params::Params;

use crate::{
    proto::{Binary, Text},
    QueryResult, Result, Row, Statement,
};

/// Something, that eventualy is a `Statement` in the context of a `T: Queryable`.
pub trait AsStatement {
    /// Make a statement out of `Self`.
    fn as_statement<Q: Queryable>(&self, queryable: &mut Q) -> Result<Cow<'_, Statement>>;
}

impl AsStatement for Statement {
    fn as_statement<Q: Queryable>(&self, _queryable: &mut Q) -> Result<Cow<'_, Statement>> {
        Ok(Cow::Borrowed(self))
    }
}

impl<'a> AsStatement for &'a Statement {
    fn as_statement<Q: Queryable>(&self, _queryable: &mut Q) -> Result<Cow<'_, Statement>> {
        Ok(Cow::Borrowed(*self))
    }
}

impl<T: AsRef<str>> AsStatement for T {
    fn as_statement<Q: Queryable>(&self, queryable: &mut Q) -> Result<Cow<'static, Statement>> {
        let statement = queryable.prep(self.as_ref())?;
        Ok(Cow::Owned(statement))
    }
}

/// Queryable object.
pub trait Queryable {
    /// Perfoms text query.
    fn query_iter<Q: AsRef<str>>(&mut self, query: Q) -> Result<QueryResult<'_, Text>>;

    /// Performs text query and collects the first result set.
    fn query<Q: AsRef<str>>(&mut self, query: Q) -> Result<Vec<Row>> {
        self.query_map(query, |row| row)
    }

    /// Performs text query and returns the first row of the first result set.
    fn query_first<Q: AsRef<str>>(&mut self, query: Q) -> Result<Option<Row>> {
        self.query_iter(query)?.next().transpose()
    }

    /// Performs text query and maps each row of the first result set.
    fn query_map<Q, F, U>(&mut self, query: Q, mut f: F) -> Result<Vec<U>>
    where
        Q: AsRef<str>,
        F: FnMut(Row) -> U,
    {
        self.query_fold(query, Vec::new(), |mut acc, row| {
            acc.push(f(row));
            acc
        })
    }

    /// Performs text query and folds the first result set to a single value.
    fn query_fold<Q, F, U>(&mut self, query: Q, init: U, mut f: F) -> Result<U>
    where
        Q: AsRef<str>,
        F: FnMut(U, Row) -> U,
    {
        self.query_iter(query)?
            .try_fold(init, |acc, row| row.map(|row| f(acc, row)))
    }

    /// Performs text query and drops the query result.
    ///
    /// Unlike dropping the `QueryResult` by hand, errors met while reading the response
    /// (server errors, an exceeded byte limit) are returned.
    fn query_drop<Q: AsRef<str>>(&mut self, query: Q) -> Result<()> {
        let mut result = self.query_iter(query)?;
        drain(&mut result)
    }

    /// Prepares the given `query` as a prepared statement.
    fn prep<Q: AsRef<str>>(&mut self, query: Q) -> Result<Statement>;

    /// This function will close the given statement on the server side.
    fn close(&mut self, stmt: Statement) -> Result<()>;

    /// Exectues the given `stmt` with the given `params`.
    ///
    /// Named parameters are refused, the protocol binds by position only.
    fn exec_iter<S, P>(&mut self, stmt: S, params: P) -> Result<QueryResult<'_, Binary>>
    where
        S: AsStatement,
        P: Into<Params>;

    /// Prepares the given statement, and exectues it with each item in the given params iterator.
    fn exec_batch<S, P, I>(&mut self, stmt: S, params: I) -> Result<()>
    where
        Self: Sized,
        S: AsStatement,
        P: Into<Params>,
        I: IntoIterator<Item = P>,
    {
        let stmt = stmt.as_statement(self)?;
        for params in params {
            self.exec_drop(stmt.as_ref(), params)?;
        }

        Ok(())
    }

    /// Exectues the given `stmt` and collects the first result set.
    fn exec<S, P>(&mut self, stmt: S, params: P) -> Result<Vec<Row>>
    where
        S: AsStatement,
        P: Into<Params>,
    {
        self.exec_map(stmt, params, |row| row)
    }

    /// Exectues the given `stmt` and returns the first row of the first result set.
    fn exec_first<S, P>(&mut self, stmt: S, params: P) -> Result<Option<Row>>
    where
        S: AsStatement,
        P: Into<Params>,
    {
        self.exec_iter(stmt, params)?.next().transpose()
    }

    /// Exectues the given `stmt` and maps each row of the first result set.
    fn exec_map<S, P, F, U>(&mut self, stmt: S, params: P, mut f: F) -> Result<Vec<U>>
    where
        S: AsStatement,
        P: Into<Params>,
        F: FnMut(Row) -> U,
    {
        self.exec_fold(stmt, params, Vec::new(), |mut acc, row| {
            acc.push(f(row));
            acc
        })
    }

    /// Exectues the given `stmt` and folds the first result set to a signel value.
    fn exec_fold<S, P, U, F>(&mut self, stmt: S, params: P, init: U, mut f: F) -> Result<U>
    where
        S: AsStatement,
        P: Into<Params>,
        F: FnMut(U, Row) -> U,
    {
        let mut result = self.exec_iter(stmt, params)?;
        let output = result.try_fold(init, |init, row| row.map(|row| f(init, row)));
        output
    }

    /// Exectues the given `stmt` and drops the result.
    fn exec_drop<S, P>(&mut self, stmt: S, params: P) -> Result<()>
    where
        S: AsStatement,
        P: Into<Params>,
    {
        let mut result = self.exec_iter(stmt, params)?;
        drain(&mut result)
    }
}

/// Reads every result set to the end, stopping at the first error.
fn drain<T: crate::proto::Protocol>(result: &mut QueryResult<'_, T>) -> Result<()> {
    while let Some(set) = result.iter() {
        for row in set {
            row?;
        }
    }
    Ok(())
}
