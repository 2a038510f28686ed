// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use sysinfo::{System, SystemExt};

/// Memory available to buffer result sets, in bytes.
///
/// Returns `configured` if set, total physical memory of the host otherwise.
pub fn max_heap_bytes(configured: Option<u64>) -> u64 {
    match configured {
        Some(bytes) => bytes,
        None => {
            let mut system = System::new();
            system.refresh_memory();
            system.total_memory()
        }
    }
}

#[cfg(test)]
mod test {
    use super::max_heap_bytes;

    #[test]
    fn should_prefer_configured_heap_size() {
        assert_eq!(max_heap_bytes(Some(1_000)), 1_000);
        assert!(max_heap_bytes(None) > 0);
    }
}
