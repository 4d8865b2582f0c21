//! Translation of parameter ids into byte offsets inside dump buffers.
//!
//! A preset buffer is the dump header message followed by the data packets
//! exactly as they travel on the wire, so a parameter's offset has to step
//! over every packet's framing. All functions here are pure.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::params::*;

/// Size of the preset dump header message.
pub const HEADER_SIZE: usize = 34;
/// Size of every preset data packet except the last.
pub const PACKET_SIZE: usize = 255;
/// Preamble, packet number, checksum and EOX.
pub const PACKET_OVERHEAD: usize = 11;
/// Payload bytes carried by a full packet.
pub const PACKET_BODY: usize = PACKET_SIZE - PACKET_OVERHEAD;
/// Bytes before the payload in each packet.
pub const PACKET_PREAMBLE: usize = 9;
pub const LAYER_STRIDE: i32 = 158;

/// Payload size of a standard preset.
const STANDARD_PAYLOAD: usize = 1496;
const EXTRA_CONTROLS: i32 = 4;

/// Structural differences between hardware revisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    /// Four extra controller parameters after the general block.
    pub extra_controller: bool,
    /// No arpeggiator post-delay parameter.
    pub reduced_arp: bool,
}

impl Variant {
    pub const STANDARD: Variant = Variant { extra_controller: false, reduced_arp: false };
    pub const EXTRA_CONTROLLER: Variant = Variant { extra_controller: true, reduced_arp: false };
    pub const REDUCED_ARP: Variant = Variant { extra_controller: false, reduced_arp: true };

    pub const KNOWN: [Variant; 3] = [Self::REDUCED_ARP, Self::STANDARD, Self::EXTRA_CONTROLLER];

    /// Identifies the variant a preset buffer of `len` bytes belongs to.
    pub fn from_len(len: usize) -> Option<Variant> {
        Self::KNOWN.into_iter().find(|v| v.dump_len() == len)
    }

    fn extra_shift(&self) -> i32 {
        if self.extra_controller { EXTRA_CONTROLS } else { 0 }
    }

    fn arp_shift(&self) -> i32 {
        if self.reduced_arp { -1 } else { 0 }
    }

    /// Number of payload bytes in a preset of this variant.
    pub fn payload_len(&self) -> usize {
        (STANDARD_PAYLOAD as i32 + 2 * (self.extra_shift() + self.arp_shift())) as usize
    }

    /// Number of data packets, tail included.
    pub fn packet_count(&self) -> usize {
        self.payload_len().div_ceil(PACKET_BODY)
    }

    /// Total size of the dump buffer: header, packets and their framing.
    pub fn dump_len(&self) -> usize {
        HEADER_SIZE + self.payload_len() + PACKET_OVERHEAD * self.packet_count()
    }

    /// Parameter counts in header order: general, arp, fx, links, then
    /// per-layer general, filter, lfo, envelope, cords.
    pub fn section_counts(&self) -> [i32; 9] {
        [
            range_len(&PRESET_NAME) + range_len(&PRESET_GENERAL) + self.extra_shift(),
            range_len(&PRESET_ARP) + self.arp_shift(),
            range_len(&PRESET_FX),
            range_len(&PRESET_LINKS),
            range_len(&LAYER_GENERAL),
            range_len(&LAYER_FILTER),
            range_len(&LAYER_LFO),
            range_len(&LAYER_ENVELOPE),
            range_len(&LAYER_CORDS),
        ]
    }
}

fn range_len(r: &RangeInclusive<i32>) -> i32 {
    r.end() - r.start() + 1
}

#[derive(Clone, Copy, PartialEq)]
enum Requires {
    Nothing,
    ExtraController,
    FullArp,
}

struct Group {
    ids: RangeInclusive<i32>,
    /// Position of the first id in a standard preset.
    base: i32,
    layered: bool,
    requires: Requires,
    /// Whether the group sits after the extra controller block.
    after_extra: bool,
    /// Whether the group sits after the arp post-delay.
    after_post_delay: bool,
}

static GROUPS: [Group; 11] = [
    Group { ids: PRESET_GENERAL, base: 16, layered: false, requires: Requires::Nothing,
        after_extra: false, after_post_delay: false },
    Group { ids: PRESET_EXTRA_CONTROLS, base: 40, layered: false,
        requires: Requires::ExtraController, after_extra: false, after_post_delay: false },
    Group { ids: 1025..=1043, base: 40, layered: false, requires: Requires::Nothing,
        after_extra: true, after_post_delay: false },
    Group { ids: ARP_POST_DELAY..=ARP_POST_DELAY, base: 59, layered: false,
        requires: Requires::FullArp, after_extra: true, after_post_delay: false },
    Group { ids: PRESET_FX, base: 60, layered: false, requires: Requires::Nothing,
        after_extra: true, after_post_delay: true },
    Group { ids: PRESET_LINKS, base: 76, layered: false, requires: Requires::Nothing,
        after_extra: true, after_post_delay: true },
    Group { ids: LAYER_GENERAL, base: 116, layered: true, requires: Requires::Nothing,
        after_extra: true, after_post_delay: true },
    Group { ids: LAYER_FILTER, base: 150, layered: true, requires: Requires::Nothing,
        after_extra: true, after_post_delay: true },
    Group { ids: LAYER_LFO, base: 154, layered: true, requires: Requires::Nothing,
        after_extra: true, after_post_delay: true },
    Group { ids: LAYER_ENVELOPE, base: 166, layered: true, requires: Requires::Nothing,
        after_extra: true, after_post_delay: true },
    Group { ids: LAYER_CORDS, base: 202, layered: true, requires: Requires::Nothing,
        after_extra: true, after_post_delay: true },
];

/// Returns the position of a parameter in byte pairs from the start of the
/// payload, ignoring packet framing.
pub fn position(id: i32, layer: i32, variant: Variant) -> Option<usize> {
    if PRESET_NAME.contains(&id) {
        return Some((id - PRESET_NAME.start()) as usize)
    }

    let group = GROUPS.iter().find(|g| g.ids.contains(&id))?;
    match group.requires {
        Requires::ExtraController if !variant.extra_controller => return None,
        Requires::FullArp if variant.reduced_arp => return None,
        _ => (),
    }

    let mut pos = group.base + (id - group.ids.start());
    if group.after_extra {
        pos += variant.extra_shift();
    }
    if group.after_post_delay {
        pos += variant.arp_shift();
    }
    if group.layered {
        if !(0..NUM_LAYERS).contains(&layer) {
            return None
        }
        pos += layer * LAYER_STRIDE;
    }
    Some(pos as usize)
}

/// Converts a payload byte position to a buffer offset.
pub fn packet_offset(payload_pos: usize) -> usize {
    HEADER_SIZE
        + PACKET_SIZE * (payload_pos / PACKET_BODY)
        + payload_pos % PACKET_BODY
        + PACKET_PREAMBLE
}

/// Maps a preset parameter to the offset of its byte pair in a buffer of
/// `len` bytes, or `None` if the parameter isn't present.
pub fn map(id: i32, layer: i32, variant: Variant, len: usize) -> Option<usize> {
    let offset = if PRESET_NAME.contains(&id) {
        HEADER_SIZE + PACKET_PREAMBLE + 2 * (id - PRESET_NAME.start()) as usize
    } else {
        packet_offset(2 * position(id, layer, variant)?)
    };
    (offset + 4 <= len).then_some(offset)
}

/// Start of the section counters in a setup dump.
pub const SETUP_COUNTS: usize = 7;
/// Start of the 16-byte setup name.
pub const SETUP_NAME_OFFSET: usize = 19;
/// Start of the setup parameter sections.
pub const SETUP_DATA: usize = 35;
/// Bytes after the last parameter: checksum and EOX.
pub const SETUP_TRAILER: usize = 2;

/// Section sizes of a setup dump, in parameters, as declared in the dump's
/// own header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupLayout {
    pub general: usize,
    pub master_midi: usize,
    pub fx: usize,
    pub reserved: usize,
    pub non_channel: usize,
    pub per_channel: usize,
    pub channels: usize,
}

impl SetupLayout {
    /// Layout used by hardware with `channels` MIDI channels.
    pub const fn standard(channels: usize) -> Self {
        Self {
            general: 16,
            master_midi: 24,
            fx: 16,
            reserved: 8,
            non_channel: 12,
            per_channel: 12,
            channels,
        }
    }

    /// Reads the section counters from a setup buffer and derives the
    /// channel count from the remaining length.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < SETUP_DATA + SETUP_TRAILER {
            return None
        }
        let count = |i: usize| {
            let v = codec::read_pair(buf, SETUP_COUNTS + 2 * i);
            usize::try_from(v).ok()
        };
        let mut layout = Self {
            general: count(0)?,
            master_midi: count(1)?,
            fx: count(2)?,
            reserved: count(3)?,
            non_channel: count(4)?,
            per_channel: count(5)?,
            channels: 0,
        };
        let body = buf.len() - SETUP_DATA - SETUP_TRAILER;
        let fixed = 2 * layout.global_params();
        if body < fixed || body % 2 != 0 {
            return None
        }
        if layout.per_channel > 0 {
            let rest = body - fixed;
            if rest % (2 * layout.per_channel) != 0 {
                return None
            }
            layout.channels = rest / (2 * layout.per_channel);
        } else if body != fixed {
            return None
        }
        Some(layout)
    }

    fn global_params(&self) -> usize {
        self.general + self.master_midi + self.fx + self.reserved + self.non_channel
    }

    /// Total buffer size implied by this layout.
    pub fn dump_len(&self) -> usize {
        SETUP_DATA
            + 2 * (self.global_params() + self.per_channel * self.channels)
            + SETUP_TRAILER
    }

    pub fn counts(&self) -> [usize; 6] {
        [self.general, self.master_midi, self.fx, self.reserved, self.non_channel,
            self.per_channel]
    }

    /// Maps a setup parameter to its offset. `channel` is only used for
    /// per-channel parameters. Name characters are single bytes.
    pub fn map(&self, id: i32, channel: i32, len: usize) -> Option<usize> {
        let offset = if SETUP_NAME.contains(&id) {
            SETUP_NAME_OFFSET + (id - SETUP_NAME.start()) as usize
        } else {
            SETUP_DATA + 2 * self.position(id, channel)?
        };
        (offset + 4 <= len).then_some(offset)
    }

    fn position(&self, id: i32, channel: i32) -> Option<usize> {
        let index = |start: i32, count: usize| -> Option<usize> {
            let i = usize::try_from(id - start).ok()?;
            (i < count).then_some(i)
        };
        let master = self.general;
        let fx = master + self.master_midi;
        let non_channel = fx + self.fx + self.reserved;
        let channels = non_channel + self.non_channel;

        if let Some(i) = index(SETUP_GENERAL, self.general) {
            Some(i)
        } else if let Some(i) = index(SETUP_MASTER_MIDI, self.master_midi) {
            Some(master + i)
        } else if let Some(i) = index(SETUP_FX, self.fx) {
            Some(fx + i)
        } else if let Some(i) = index(SETUP_NON_CHANNEL, self.non_channel) {
            Some(non_channel + i)
        } else if let Some(i) = index(SETUP_CHANNEL, self.per_channel) {
            let channel = usize::try_from(channel).ok()?;
            (channel < self.channels).then_some(channels + channel * self.per_channel + i)
        } else {
            None
        }
    }
}
