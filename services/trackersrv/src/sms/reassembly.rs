//! Multi-part message reassembly
//!
//! Parts are grouped by `"{sender}_{reference}"` and ordered by part index.
//! Incomplete assemblies are evicted after `max_age`, or oldest first once more
//! than `max_pending` are open. Evicted parts are queued for the caller so the
//! modem store slots they occupy can be freed.

use super::pdu::PduMessage;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Eviction bounds for incomplete assemblies
#[derive(Debug, Clone, Copy)]
pub struct AssemblyLimits {
    pub max_age: Duration,
    pub max_pending: usize,
}

impl Default for AssemblyLimits {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 3600),
            max_pending: 256,
        }
    }
}

struct PartialAssembly {
    part_count: u8,
    parts: BTreeMap<u8, PduMessage>,
    first_seen: Instant,
}

pub struct Reassembler {
    pending: HashMap<String, PartialAssembly>,
    evicted: Vec<PduMessage>,
    limits: AssemblyLimits,
}

impl Reassembler {
    pub fn new(limits: AssemblyLimits) -> Self {
        Self {
            pending: HashMap::new(),
            evicted: Vec::new(),
            limits,
        }
    }

    /// Returns the complete message once every part is present
    pub fn reassemble(&mut self, message: PduMessage) -> Option<PduMessage> {
        self.reassemble_at(message, Instant::now())
    }

    fn reassemble_at(&mut self, message: PduMessage, now: Instant) -> Option<PduMessage> {
        let (Some(reference), Some(index), Some(count)) =
            (message.reference, message.part_index, message.part_count)
        else {
            return Some(message);
        };
        if count <= 1 {
            return Some(message);
        }

        let key = format!("{}_{}", message.sender, reference);
        if !self.pending.contains_key(&key) {
            self.evict_at(now);
            self.enforce_capacity();
        }

        let assembly = self
            .pending
            .entry(key.clone())
            .or_insert_with(|| PartialAssembly {
                part_count: count,
                parts: BTreeMap::new(),
                first_seen: now,
            });
        let kept = message.raw_indexes.clone();
        if let Some(mut replaced) = assembly.parts.insert(index, message) {
            debug!(
                "Duplicate part {} for {}, keeping the newest",
                index, key
            );
            // slots shared with the kept part stay in the modem store
            replaced.raw_indexes.retain(|slot| !kept.contains(slot));
            if !replaced.raw_indexes.is_empty() {
                self.evicted.push(replaced);
            }
        }

        let assembly = self.pending.get(&key)?;
        if assembly.parts.len() < usize::from(assembly.part_count) {
            debug!(
                "Assembly {}: {}/{} parts",
                key,
                assembly.parts.len(),
                assembly.part_count
            );
            return None;
        }

        let assembly = self.pending.remove(&key)?;
        concatenate(assembly)
    }

    /// Evict assemblies older than `max_age` and return their parts
    pub fn evict_expired(&mut self) -> Vec<PduMessage> {
        self.evict_at(Instant::now());
        self.take_evicted()
    }

    /// Parts evicted since the last call
    pub fn take_evicted(&mut self) -> Vec<PduMessage> {
        std::mem::take(&mut self.evicted)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn evict_at(&mut self, now: Instant) {
        let max_age = self.limits.max_age;
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, a)| now.saturating_duration_since(a.first_seen) >= max_age)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.evict_key(&key, "expired");
        }
    }

    fn enforce_capacity(&mut self) {
        while self.pending.len() >= self.limits.max_pending.max(1) {
            let Some(oldest) = self
                .pending
                .iter()
                .min_by_key(|(_, a)| a.first_seen)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            self.evict_key(&oldest, "capacity reached");
        }
    }

    fn evict_key(&mut self, key: &str, reason: &str) {
        if let Some(assembly) = self.pending.remove(key) {
            warn!(
                "Dropping incomplete message {} ({}/{} parts): {}",
                key,
                assembly.parts.len(),
                assembly.part_count,
                reason
            );
            self.evicted.extend(assembly.parts.into_values());
        }
    }
}

fn concatenate(assembly: PartialAssembly) -> Option<PduMessage> {
    let mut parts = assembly.parts.into_values();
    let mut merged = parts.next()?;
    merged.part_index = None;
    for part in parts {
        merged.text.push_str(&part.text);
        merged.raw_indexes.extend(part.raw_indexes);
    }
    Some(merged)
}
