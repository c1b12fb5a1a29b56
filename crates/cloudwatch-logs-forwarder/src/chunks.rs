// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use cloudwatch_logs_core::adapter::HostRecord;

/// Records handed to the plugin in one flush call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub records: Vec<HostRecord>,
    /// Flush calls that ended in a retry so far.
    pub attempts: u32,
}

/// Open chunks keyed by tag.
#[derive(Debug)]
pub struct ChunkBuffer {
    chunks: BTreeMap<String, Chunk>,
    max_records: usize,
}

impl ChunkBuffer {
    pub fn new(max_records: usize) -> Self {
        Self {
            chunks: BTreeMap::new(),
            max_records: max_records.max(1),
        }
    }

    /// Adds a record. Returns true once the tag's chunk is full.
    pub fn push(&mut self, tag: &str, record: HostRecord) -> bool {
        let chunk = self.chunks.entry(tag.to_string()).or_default();
        chunk.records.push(record);
        chunk.records.len() >= self.max_records
    }

    pub fn take(&mut self, tag: &str) -> Option<Chunk> {
        self.chunks.remove(tag)
    }

    /// Closes every open chunk, ordered by tag.
    pub fn take_all(&mut self) -> Vec<(String, Chunk)> {
        std::mem::take(&mut self.chunks).into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
