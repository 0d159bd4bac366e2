//! Page-based request/reply mailbox.
//!
//! The firmware exposes a status block followed by a ring of fixed-size pages.
//! Software writes a request into the page named by `next_request_page`, the
//! firmware consumes it, writes the reply into the same slot (offset by
//! [`REPLY_BASE_OFFSET`] words) and bumps `num_replies`.
//!
//! ```text
//! word  base+0   num_buffers        ┐
//!       base+1   words_per_page     │ status block (hardware-owned)
//!       base+2   next_request_page  │
//!       base+3   num_replies        ┘
//!
//! page n request:  base + wpp*n          header, payload...
//! page n reply:    base + wpp*n + 4      header, payload...
//! ```
//!
//! Every page starts with a length header:
//! `header = PAGE_FLAG | (payload_words - 1)`.

/// Marker bit identifying a valid length header.
pub const PAGE_FLAG: u32 = 0x0001_0000;

/// Number of words in the status block.
pub const STATUS_WORDS: usize = 4;

/// Word index of `num_replies` within the status block.
pub const NUM_REPLIES_INDEX: u32 = 3;

/// Reply page offset from the request page base, in words.
pub const REPLY_BASE_OFFSET: u32 = 4;

/// Encode a payload length into a page header.
///
/// Returns `None` for an empty payload or one whose length collides with the
/// flag bit.
#[must_use]
pub const fn encode_header(payload_words: usize) -> Option<u32> {
    if payload_words == 0 || payload_words > PAGE_FLAG as usize {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let count = (payload_words - 1) as u32;
    Some(PAGE_FLAG | count)
}

/// Decode a page header into a payload length in words.
///
/// Returns `None` when the flag bit is missing (an unwritten or corrupt page).
#[must_use]
pub const fn decode_header(header: u32) -> Option<usize> {
    if header & PAGE_FLAG == 0 {
        return None;
    }
    Some((header & !PAGE_FLAG) as usize + 1)
}

/// Where the mailbox lives inside the AXI window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxLayout {
    /// Word address of the status block; page addresses are relative to it.
    pub base: u32,
    /// Reply page offset from the request page base, in words.
    pub reply_base_offset: u32,
}

impl Default for MailboxLayout {
    fn default() -> Self {
        Self {
            base: 0,
            reply_base_offset: REPLY_BASE_OFFSET,
        }
    }
}

impl MailboxLayout {
    /// Word address of the `num_replies` counter.
    #[must_use]
    pub const fn num_replies_address(&self) -> u32 {
        self.base + NUM_REPLIES_INDEX
    }
}

/// Snapshot of the hardware status block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of page slots.
    pub num_buffers: u32,
    /// Page stride in words.
    pub words_per_page: u32,
    /// Page the firmware consumes next.
    pub next_request_page: u32,
    /// Replies produced so far (wrapping counter).
    pub num_replies: u32,
}

impl MailboxStatus {
    /// Build from the four raw status words, in hardware order.
    #[must_use]
    pub const fn from_words(words: [u32; STATUS_WORDS]) -> Self {
        Self {
            num_buffers: words[0],
            words_per_page: words[1],
            next_request_page: words[2],
            num_replies: words[3],
        }
    }

    /// Raw status words, in hardware order.
    #[must_use]
    pub const fn to_words(&self) -> [u32; STATUS_WORDS] {
        [
            self.num_buffers,
            self.words_per_page,
            self.next_request_page,
            self.num_replies,
        ]
    }

    /// Payload words that fit in one request page after the header.
    #[must_use]
    pub const fn page_capacity(&self) -> usize {
        (self.words_per_page as usize).saturating_sub(1)
    }

    /// Base word address of the current request page.
    ///
    /// `None` if the address does not fit in 32 bits.
    #[must_use]
    pub fn request_base(&self, layout: &MailboxLayout) -> Option<u32> {
        self.words_per_page
            .checked_mul(self.next_request_page)?
            .checked_add(layout.base)
    }

    /// Base word address of the reply for the current request page.
    #[must_use]
    pub fn reply_base(&self, layout: &MailboxLayout) -> Option<u32> {
        self.request_base(layout)?
            .checked_add(layout.reply_base_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_for_every_page_length() {
        let words_per_page = 64usize;
        for n in 1..words_per_page {
            let header = encode_header(n).unwrap();
            assert_ne!(header & PAGE_FLAG, 0);
            assert_eq!(decode_header(header), Some(n));
        }
    }

    #[test]
    fn three_word_request_header() {
        assert_eq!(encode_header(3), Some(0x0001_0002));
    }

    #[test]
    fn header_without_flag_is_rejected() {
        assert_eq!(decode_header(0), None);
        assert_eq!(decode_header(0x0000_0002), None);
        assert_eq!(encode_header(0), None);
    }

    #[test]
    fn page_addressing_follows_next_request_page() {
        let status = MailboxStatus::from_words([4, 20, 1, 5]);
        let layout = MailboxLayout::default();
        assert_eq!(status.request_base(&layout), Some(20));
        assert_eq!(status.reply_base(&layout), Some(24));
        assert_eq!(status.page_capacity(), 19);
        assert_eq!(status.to_words(), [4, 20, 1, 5]);
    }

    #[test]
    fn layout_base_shifts_every_address() {
        let status = MailboxStatus::from_words([4, 20, 2, 0]);
        let layout = MailboxLayout {
            base: 0x100,
            ..MailboxLayout::default()
        };
        assert_eq!(status.request_base(&layout), Some(0x100 + 40));
        assert_eq!(status.reply_base(&layout), Some(0x100 + 44));
        assert_eq!(layout.num_replies_address(), 0x103);
    }

    #[test]
    fn overflowing_page_address_is_none() {
        let status = MailboxStatus::from_words([4, 0x1000_0000, 0x100, 0]);
        assert_eq!(status.request_base(&MailboxLayout::default()), None);
    }
}
