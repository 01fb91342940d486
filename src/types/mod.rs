/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types shared by the block index and the coin caches.

pub mod coins;

pub mod data_types;

pub mod header;

pub mod merkle;
