//! Shuffle sharding
//!
//! Each flow is dealt a hand of distinct queue indices from a deck of
//! `deck_size` queues. The hand is a pure function of the flow's hash, so a
//! flow lands on the same queues every time, across restarts.

use std::hash::Hasher;

/// Bits of a 64-bit hash we are willing to consume when dealing
pub const MAX_HASH_BITS: u32 = 60;

/// Largest deck a level may configure; every queue is allocated up front
pub const MAX_QUEUES: u32 = 1 << 16;

/// FNV-1a with a murmur-style finalizer
#[derive(Clone, Copy)]
pub struct FlowHasher {
    state: u64,
}

impl FlowHasher {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    pub fn new() -> Self {
        Self {
            state: Self::FNV_OFFSET,
        }
    }

    fn mix(mut h: u64) -> u64 {
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^= h >> 33;
        h
    }
}

impl Default for FlowHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FlowHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(Self::FNV_PRIME);
        }
    }

    fn finish(&self) -> u64 {
        Self::mix(self.state)
    }
}

/// Bits of entropy needed to deal `hand_size` cards from `deck_size`
pub fn required_entropy_bits(deck_size: u32, hand_size: u32) -> u32 {
    (f64::from(hand_size) * f64::from(deck_size).log2()).ceil() as u32
}

/// Deals hands of distinct queue indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dealer {
    deck_size: u32,
    hand_size: u32,
}

impl Dealer {
    pub fn new(deck_size: u32, hand_size: u32) -> Result<Self, String> {
        if deck_size == 0 {
            return Err("queues must be positive".to_string());
        }
        if deck_size > MAX_QUEUES {
            return Err(format!("{} queues exceeds the maximum of {}", deck_size, MAX_QUEUES));
        }
        if hand_size == 0 {
            return Err("hand size must be positive".to_string());
        }
        if hand_size > deck_size {
            return Err(format!("hand size {} exceeds {} queues", hand_size, deck_size));
        }
        let bits = required_entropy_bits(deck_size, hand_size);
        if bits > MAX_HASH_BITS {
            return Err(format!(
                "hand size {} over {} queues needs {} bits of hash, max is {}",
                hand_size, deck_size, bits, MAX_HASH_BITS
            ));
        }
        Ok(Self { deck_size, hand_size })
    }

    pub fn deck_size(&self) -> u32 {
        self.deck_size
    }

    pub fn hand_size(&self) -> u32 {
        self.hand_size
    }

    /// Deal the hand for a hash value, in pick order
    pub fn deal(&self, mut hash: u64) -> Vec<usize> {
        let mut hand = Vec::with_capacity(self.hand_size as usize);
        // Picked cards in ascending order, used to skip already-dealt cards
        let mut picked: Vec<usize> = Vec::with_capacity(self.hand_size as usize);

        for i in 0..self.hand_size {
            let remaining = u64::from(self.deck_size - i);
            let mut card = (hash % remaining) as usize;
            hash /= remaining;

            for &taken in &picked {
                if card >= taken {
                    card += 1;
                }
            }
            let pos = picked.partition_point(|&taken| taken < card);
            picked.insert(pos, card);
            hand.push(card);
        }
        hand
    }
}
