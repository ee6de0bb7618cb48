//! Channel layouts for buffers and device output

use crate::AmbiOrder;

/// Channel layout of stored buffer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferLayout {
    Mono,
    Stereo,
    /// Two rear channels.
    Rear,
    Quad,
    Surround51,
    Surround61,
    Surround71,
    /// First-order horizontal B-format (W, X, Y).
    BFormat2D,
    /// First-order full-sphere B-format (ACN order).
    BFormat3D,
}

impl BufferLayout {
    /// Number of interleaved channels in this layout.
    pub fn channel_count(self) -> usize {
        match self {
            BufferLayout::Mono => 1,
            BufferLayout::Stereo | BufferLayout::Rear => 2,
            BufferLayout::Quad => 4,
            BufferLayout::Surround51 => 6,
            BufferLayout::Surround61 => 7,
            BufferLayout::Surround71 => 8,
            BufferLayout::BFormat2D => 3,
            BufferLayout::BFormat3D => 4,
        }
    }

    /// Whether this layout carries ambisonic channels rather than
    /// loudspeaker feeds.
    pub fn is_bformat(self) -> bool {
        matches!(self, BufferLayout::BFormat2D | BufferLayout::BFormat3D)
    }
}

/// Named loudspeaker positions used by the device decode stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    BackLeft,
    BackRight,
    BackCenter,
    SideLeft,
    SideRight,
}

impl Speaker {
    /// Azimuth of the loudspeaker in degrees, 0 at front, positive right.
    pub fn azimuth(self) -> f32 {
        match self {
            Speaker::FrontLeft => -30.0,
            Speaker::FrontRight => 30.0,
            Speaker::FrontCenter => 0.0,
            Speaker::Lfe => 0.0,
            Speaker::BackLeft => -150.0,
            Speaker::BackRight => 150.0,
            Speaker::BackCenter => 180.0,
            Speaker::SideLeft => -90.0,
            Speaker::SideRight => 90.0,
        }
    }

    /// LFE carries no directional information.
    pub fn is_lfe(self) -> bool {
        matches!(self, Speaker::Lfe)
    }
}

/// Channel layout of the device's real output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLayout {
    Mono,
    Stereo,
    Quad,
    Surround51,
    Surround61,
    Surround71,
    /// Raw ambisonic output of the given order (ACN channels pass through).
    Ambisonic(AmbiOrder),
}

impl DeviceLayout {
    /// Number of output channels delivered to the backend.
    pub fn channel_count(self) -> usize {
        match self {
            DeviceLayout::Mono => 1,
            DeviceLayout::Stereo => 2,
            DeviceLayout::Quad => 4,
            DeviceLayout::Surround51 => 6,
            DeviceLayout::Surround61 => 7,
            DeviceLayout::Surround71 => 8,
            DeviceLayout::Ambisonic(order) => order.channel_count(),
        }
    }

    /// Loudspeaker map for decode, in output-channel order. Empty for
    /// ambisonic passthrough.
    pub fn speakers(self) -> &'static [Speaker] {
        use Speaker::*;
        match self {
            DeviceLayout::Mono => &[FrontCenter],
            DeviceLayout::Stereo => &[FrontLeft, FrontRight],
            DeviceLayout::Quad => &[FrontLeft, FrontRight, BackLeft, BackRight],
            DeviceLayout::Surround51 => {
                &[FrontLeft, FrontRight, FrontCenter, Lfe, SideLeft, SideRight]
            }
            DeviceLayout::Surround61 => &[
                FrontLeft,
                FrontRight,
                FrontCenter,
                Lfe,
                BackCenter,
                SideLeft,
                SideRight,
            ],
            DeviceLayout::Surround71 => &[
                FrontLeft,
                FrontRight,
                FrontCenter,
                Lfe,
                BackLeft,
                BackRight,
                SideLeft,
                SideRight,
            ],
            DeviceLayout::Ambisonic(_) => &[],
        }
    }

    /// Whether this layout feeds headphones (stereo) and is therefore a
    /// candidate for binaural rendering.
    pub fn is_headphone_capable(self) -> bool {
        matches!(self, DeviceLayout::Stereo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_layout_counts() {
        assert_eq!(BufferLayout::Mono.channel_count(), 1);
        assert_eq!(BufferLayout::Stereo.channel_count(), 2);
        assert_eq!(BufferLayout::Surround71.channel_count(), 8);
        assert_eq!(BufferLayout::BFormat2D.channel_count(), 3);
        assert_eq!(BufferLayout::BFormat3D.channel_count(), 4);
    }

    #[test]
    fn test_device_layout_speaker_maps() {
        assert_eq!(
            DeviceLayout::Stereo.speakers().len(),
            DeviceLayout::Stereo.channel_count()
        );
        assert_eq!(
            DeviceLayout::Surround71.speakers().len(),
            DeviceLayout::Surround71.channel_count()
        );
        assert!(DeviceLayout::Ambisonic(AmbiOrder::First).speakers().is_empty());
    }

    #[test]
    fn test_lfe_is_nondirectional() {
        assert!(Speaker::Lfe.is_lfe());
        assert!(!Speaker::FrontLeft.is_lfe());
    }
}
