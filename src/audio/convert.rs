// PCM16 conversion helpers
//
// The realtime endpoint expects little-endian 16-bit signed mono PCM.
// Capture converts with an asymmetric scale (negative samples use the full
// 32768 range, non-negative samples 32767) and playback scales back by 32767.

/// Convert one float sample to PCM16
pub fn f32_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
    scaled.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert float samples to little-endian PCM16 bytes
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| f32_to_pcm16(s).to_le_bytes())
        .collect()
}

/// Decode little-endian PCM16 bytes; a trailing odd byte is ignored
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Scale a PCM16 sample back to [-1.0, 1.0] for an output device
pub fn pcm16_to_f32(sample: i16) -> f32 {
    (sample as f32 / 32767.0).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asymmetric_scale() {
        assert_eq!(f32_to_pcm16(1.0), 32767);
        assert_eq!(f32_to_pcm16(-1.0), -32768);
        assert_eq!(f32_to_pcm16(0.0), 0);
        assert_eq!(f32_to_pcm16(0.5), 16384); // 16383.5 rounds away from zero
        assert_eq!(f32_to_pcm16(-0.5), -16384);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(f32_to_pcm16(3.0), 32767);
        assert_eq!(f32_to_pcm16(-7.5), -32768);
    }

    #[test]
    fn test_odd_trailing_byte_ignored() {
        assert_eq!(pcm16_from_bytes(&[0x01, 0x00, 0xff]), vec![1]);
    }

    #[test]
    fn test_playback_scale() {
        assert_eq!(pcm16_to_f32(32767), 1.0);
        assert_eq!(pcm16_to_f32(0), 0.0);
        assert_eq!(pcm16_to_f32(i16::MIN), -1.0);
    }
}
