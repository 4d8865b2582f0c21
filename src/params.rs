//! Parameter identifiers. Ids are stable across hardware variants; only their
//! position inside a dump changes.

use std::ops::RangeInclusive;

/// Layer argument for parameters that aren't layer-scoped.
pub const NO_LAYER: i32 = -1;
/// Returned by dump getters for parameters that aren't present.
pub const ABSENT: i32 = -999;
pub const NUM_LAYERS: i32 = 4;

/// Sent ahead of layer-scoped edits to pick the layer they apply to.
pub const LAYER_SELECT: i32 = 898;

// preset groups
pub const PRESET_NAME: RangeInclusive<i32> = 899..=914;
pub const PRESET_GENERAL: RangeInclusive<i32> = 915..=938;
pub const PRESET_EXTRA_CONTROLS: RangeInclusive<i32> = 939..=942;
pub const PRESET_ARP: RangeInclusive<i32> = 1025..=1044;
pub const PRESET_FX: RangeInclusive<i32> = 1153..=1168;
pub const PRESET_LINKS: RangeInclusive<i32> = 1281..=1320;
pub const LAYER_GENERAL: RangeInclusive<i32> = 1409..=1442;
pub const LAYER_FILTER: RangeInclusive<i32> = 1537..=1540;
pub const LAYER_LFO: RangeInclusive<i32> = 1665..=1676;
pub const LAYER_ENVELOPE: RangeInclusive<i32> = 1793..=1828;
pub const LAYER_CORDS: RangeInclusive<i32> = 1921..=1992;

pub const PRESET_NAME_LEN: usize = 16;

pub const PRESET_CTRL_A: i32 = 915;
pub const PRESET_TEMPO_OFFSET: i32 = 927;
pub const PRESET_VELOCITY_CURVE: i32 = 928;
pub const PRESET_KBD_TUNING: i32 = 929;
pub const PRESET_CTRL_M: i32 = 939;

pub const ARP_STATUS: i32 = 1025;
pub const ARP_MODE: i32 = 1026;
pub const ARP_PATTERN: i32 = 1028;
pub const ARP_PRE_DELAY: i32 = 1041;
pub const ARP_POST_DELAY: i32 = 1044;

pub const FX_A_ALGORITHM: i32 = 1153;
pub const FX_B_ALGORITHM: i32 = 1161;

pub const LINK1_PRESET: i32 = 1281;
pub const LINK2_PRESET: i32 = 1301;

pub const LAYER_INSTRUMENT: i32 = 1409;
pub const LAYER_VOLUME: i32 = 1410;
pub const LAYER_PAN: i32 = 1411;
pub const LAYER_KEY_LOW: i32 = 1413;
pub const LAYER_KEY_HIGH: i32 = 1415;
pub const LAYER_COARSE_TUNE: i32 = 1425;
pub const LAYER_FINE_TUNE: i32 = 1426;
pub const FILTER_TYPE: i32 = 1537;
pub const FILTER_FREQ: i32 = 1538;
pub const FILTER_Q: i32 = 1539;
pub const LFO1_SHAPE: i32 = 1665;
pub const LFO1_RATE: i32 = 1667;
pub const AMP_ENV_ATK1_RATE: i32 = 1793;
pub const AMP_ENV_ATK1_LEVEL: i32 = 1794;
pub const FILTER_ENV_ATK1_RATE: i32 = 1805;
pub const AUX_ENV_ATK1_RATE: i32 = 1817;
pub const CORD0_SOURCE: i32 = 1921;
pub const CORD0_DEST: i32 = 1922;
pub const CORD0_AMOUNT: i32 = 1923;

// setup groups
pub const SETUP_CHANNEL: i32 = 130;
pub const SETUP_GENERAL: i32 = 257;
pub const SETUP_MASTER_MIDI: i32 = 385;
pub const SETUP_FX: i32 = 513;
pub const SETUP_NON_CHANNEL: i32 = 641;
pub const SETUP_NAME: RangeInclusive<i32> = 769..=784;

pub const CHANNEL_PRESET: i32 = 130;
pub const CHANNEL_VOLUME: i32 = 131;
pub const CHANNEL_PAN: i32 = 132;
pub const MASTER_TRANSPOSE: i32 = 257;
pub const MASTER_TUNE: i32 = 258;

// arp pattern ids; step fields take the step index as their layer
pub const ARP_STEP_OFFSET: i32 = 1;
pub const ARP_STEP_VELOCITY: i32 = 2;
pub const ARP_STEP_DURATION: i32 = 3;
pub const ARP_STEP_REPEAT: i32 = 4;
pub const ARP_LOOP_STEP: i32 = 5;
pub const ARP_PATTERN_NAME: RangeInclusive<i32> = 16..=31;

/// Returns true for layer-scoped preset parameters.
pub fn is_layer_param(id: i32) -> bool {
    LAYER_GENERAL.contains(&id)
        || LAYER_FILTER.contains(&id)
        || LAYER_LFO.contains(&id)
        || LAYER_ENVELOPE.contains(&id)
        || LAYER_CORDS.contains(&id)
}

pub fn is_envelope(id: i32) -> bool {
    LAYER_ENVELOPE.contains(&id)
}

/// Returns the rate/level companion of an envelope id.
pub fn envelope_pair(id: i32) -> Option<i32> {
    if !is_envelope(id) {
        return None
    }
    if (id - LAYER_ENVELOPE.start()) % 2 == 0 {
        Some(id + 1)
    } else {
        Some(id - 1)
    }
}

/// The rate id of an envelope stage, used to tell stages apart.
pub fn envelope_stage(id: i32) -> Option<i32> {
    envelope_pair(id).map(|pair| pair.min(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_pair() {
        assert_eq!(envelope_pair(AMP_ENV_ATK1_RATE), Some(AMP_ENV_ATK1_LEVEL));
        assert_eq!(envelope_pair(AMP_ENV_ATK1_LEVEL), Some(AMP_ENV_ATK1_RATE));
        assert_eq!(envelope_pair(1828), Some(1827));
        assert_eq!(envelope_pair(LAYER_VOLUME), None);
        assert_eq!(envelope_stage(1828), Some(1827));
    }

    #[test]
    fn test_layer_params() {
        assert!(is_layer_param(LAYER_VOLUME));
        assert!(is_layer_param(CORD0_AMOUNT));
        assert!(!is_layer_param(PRESET_CTRL_A));
        assert!(!is_layer_param(ARP_POST_DELAY));
    }
}
