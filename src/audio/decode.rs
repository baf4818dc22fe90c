use anyhow::{anyhow, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::output::AudioOutput;

/// Summary of one decode run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub packets: usize,
    pub samples: usize,
    pub cancelled: bool,
}

/// Decode a compressed audio source (MP3, WAV, ...) into `output`.
///
/// Runs on a blocking thread. Checks `cancel` between packets; a cancelled run
/// stops the output and returns early without error.
pub fn decode_into(
    source: Box<dyn MediaSource>,
    mime_type: &str,
    output: &mut dyn AudioOutput,
    cancel: &CancellationToken,
) -> Result<DecodeStats> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    hint.mime_type(mime_type);

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("No decodable audio track"))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
    let mut stats = DecodeStats::default();

    loop {
        if cancel.is_cancelled() {
            output.stop();
            stats.cancelled = true;
            return Ok(stats);
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);

                output.write(buffer.samples(), spec.rate, spec.channels.count() as u16)?;
                stats.packets += 1;
                stats.samples += buffer.samples().len();
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    output.drain(cancel)?;
    stats.cancelled = cancel.is_cancelled();

    debug!("Decoded {} packets ({} samples)", stats.packets, stats.samples);
    Ok(stats)
}
