// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Resource limits consulted by the protocol layer.

pub use self::{
    buffer_limit::{resolve_byte_limit, ByteLimit, BYTE_LIMIT_FORMAT},
    heap::max_heap_bytes,
    property::{
        MaxAllowedPacket, MaxResultBuffer, ModifiableProperty, PropertySnapshot, ReadableProperty,
        RuntimeProperties, DEFAULT_MAX_ALLOWED_PACKET, MAX_MAX_ALLOWED_PACKET, MIN_MAX_ALLOWED_PACKET,
    },
};

mod buffer_limit;
mod heap;
mod property;
