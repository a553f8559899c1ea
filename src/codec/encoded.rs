//! Encoded output and per-frame metadata

use bytes::Bytes;

use super::{CodecType, VideoFrameType};
use crate::encoder::{EncoderError, EncoderResult};

/// One encoded layer of one input frame
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Bytes,
    pub encoded_width: u32,
    pub encoded_height: u32,
    /// RTP timestamp copied from the input frame
    pub rtp_timestamp: u32,
    pub capture_time_ms: i64,
    pub frame_type: VideoFrameType,
    /// Quantizer used for this frame, when the backend reports one
    pub qp: Option<i32>,
    pub spatial_index: Option<u8>,
}

impl EncodedImage {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_key_frame(&self) -> bool {
        self.frame_type == VideoFrameType::Key
    }
}

/// Codec-specific metadata the packetizer needs alongside the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecSpecificInfo {
    pub codec_type: CodecType,
    pub temporal_index: u8,
    pub spatial_index: u8,
    /// Last spatial layer of this picture
    pub end_of_picture: bool,
    /// Frame only references the base temporal layer, allowing a
    /// receiver to switch up to this temporal layer
    pub layer_sync: bool,
}

/// How an encoded payload is split into independently parseable partitions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FragmentationHeader {
    offsets: Vec<usize>,
    lengths: Vec<usize>,
}

impl FragmentationHeader {
    /// One partition spanning the whole payload
    pub fn single(len: usize) -> Self {
        Self {
            offsets: vec![0],
            lengths: vec![len],
        }
    }

    /// Contiguous partitions of at most `max_partition` bytes
    pub fn split(len: usize, max_partition: usize) -> Self {
        if max_partition == 0 || len <= max_partition {
            return Self::single(len);
        }

        let mut header = Self::default();
        let mut offset = 0;
        while offset < len {
            let chunk = max_partition.min(len - offset);
            header.offsets.push(offset);
            header.lengths.push(chunk);
            offset += chunk;
        }
        header
    }

    pub fn from_partitions(offsets: Vec<usize>, lengths: Vec<usize>) -> EncoderResult<Self> {
        if offsets.len() != lengths.len() {
            return Err(EncoderError::InvalidParameter(format!(
                "fragmentation has {} offsets but {} lengths",
                offsets.len(),
                lengths.len()
            )));
        }
        Ok(Self { offsets, lengths })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Iterate `(offset, length)` pairs
    pub fn partitions(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.offsets.iter().copied().zip(self.lengths.iter().copied())
    }

    /// Check that every partition lies inside a payload of `payload_len`
    /// bytes and that partitions do not overlap
    pub fn validate(&self, payload_len: usize) -> EncoderResult<()> {
        let mut end_of_previous = 0;
        for (i, (offset, length)) in self.partitions().enumerate() {
            if offset < end_of_previous {
                return Err(EncoderError::InvalidParameter(format!(
                    "partition {} at {} overlaps previous partition ending at {}",
                    i, offset, end_of_previous
                )));
            }
            let end = offset.checked_add(length).unwrap_or(usize::MAX);
            if end > payload_len {
                return Err(EncoderError::InvalidParameter(format!(
                    "partition {} ends at {} beyond payload of {} bytes",
                    i, end, payload_len
                )));
            }
            end_of_previous = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_max_partition() {
        let header = FragmentationHeader::split(2500, 1200);
        let parts: Vec<_> = header.partitions().collect();
        assert_eq!(parts, vec![(0, 1200), (1200, 1200), (2400, 100)]);
        assert!(header.validate(2500).is_ok());
    }

    #[test]
    fn test_small_payload_single_partition() {
        let header = FragmentationHeader::split(800, 1200);
        assert_eq!(header.len(), 1);
        assert_eq!(header, FragmentationHeader::single(800));
    }

    #[test]
    fn test_validate_out_of_bounds() {
        let header = FragmentationHeader::from_partitions(vec![0, 10], vec![10, 20]).unwrap();
        assert!(header.validate(30).is_ok());
        assert!(header.validate(29).is_err());

        let overlapping = FragmentationHeader::from_partitions(vec![0, 5], vec![10, 5]).unwrap();
        assert!(overlapping.validate(100).is_err());
    }

    #[test]
    fn test_mismatched_partitions_rejected() {
        assert!(FragmentationHeader::from_partitions(vec![0], vec![]).is_err());
    }
}
