// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use mysql_common::value::{
    convert::{from_value_opt, FromValue, FromValueError},
    Value,
};

use std::{fmt, ops::Index, sync::Arc};

use crate::packets::Column;

/// One decoded row, aligned with the column definitions of its result set.
#[derive(Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<[Column]>,
}

impl Row {
    pub fn new(values: Vec<Value>, columns: Arc<[Column]>) -> Row {
        Row { values, columns }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns_ref(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns(&self) -> Arc<[Column]> {
        self.columns.clone()
    }

    /// Value at `index`, `None` if it is SQL `NULL` or out of range.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).filter(|value| **value != Value::NULL)
    }

    /// Like [`Row::get`] but looks the column up by name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self
            .columns
            .iter()
            .position(|column| column.name_str() == name)?;
        self.get(index)
    }

    /// Converts the value at `index`. `None` if it is `NULL` or out of range.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Option<Result<T, FromValueError>> {
        self.get(index).cloned().map(from_value_opt)
    }

    pub fn unwrap(self) -> Vec<Value> {
        self.values
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Row");
        for (column, value) in self.columns.iter().zip(self.values.iter()) {
            debug.field(&column.name_str(), value);
        }
        debug.finish()
    }
}

#[cfg(test)]
mod test {
    use mysql_common::constants::ColumnType;

    use super::*;

    #[test]
    fn should_hide_nulls_and_lookup_by_name() {
        let columns: Arc<[Column]> = vec![
            Column::new(ColumnType::MYSQL_TYPE_LONGLONG).with_name(b"id"),
            Column::new(ColumnType::MYSQL_TYPE_VAR_STRING).with_name(b"note"),
        ]
        .into();
        let row = Row::new(vec![Value::Int(7), Value::NULL], columns);

        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int(7)));
        assert_eq!(row.get(1), None);
        assert_eq!(row.get(2), None);
        assert_eq!(row[1], Value::NULL);
        assert_eq!(row.get_by_name("id"), Some(&Value::Int(7)));
        assert_eq!(row.get_as::<i64>(0).unwrap().unwrap(), 7);
        assert!(row.get_as::<String>(1).is_none());
    }
}
