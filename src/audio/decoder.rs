use crate::audio::stream_source::HttpStreamSource;
use crate::error::{AppError, AppResult};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

/// One decoded packet's worth of interleaved samples.
pub struct DecodedSamples {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Pull-style decode front end over a progressive download. Probes the
/// container on construction, then hands out packets until end of stream.
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

/// Container extension for a manifest codec string, used as a probe
/// hint. Unknown codecs probe without one.
fn hint_extension(codec: &str) -> Option<&'static str> {
    match codec {
        "flac" | "flac_hires" => Some("flac"),
        "aac" | "aaclc" | "mp4a" | "mp4a.40.2" | "heaacv1" | "mp4a.40.5" => Some("m4a"),
        "mp4" => Some("mp4"),
        "mp3" => Some("mp3"),
        _ => None,
    }
}

impl AudioDecoder {
    /// Probing blocks on the download until enough of the container has
    /// arrived to identify it.
    pub fn new(source: HttpStreamSource, codec_hint: Option<&str>) -> AppResult<Self> {
        let stream = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        if let Some(codec) = codec_hint {
            match hint_extension(&codec.to_lowercase()) {
                Some(ext) => {
                    hint.with_extension(ext);
                }
                None => log::warn!("no probe hint for codec {}", codec),
            }
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| AppError::Decode(format!("format probe failed: {}", e)))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AppError::Decode("no decodable audio track".into()))?;
        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AppError::Decode(format!("unsupported codec: {}", e)))?;

        log::debug!(
            "decoder ready: {} Hz, {} channels, hint {:?}",
            sample_rate,
            channels,
            codec_hint
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Coarse seek; the demuxer lands on the nearest preceding sync point.
    pub fn seek(&mut self, position_seconds: f64) -> AppResult<()> {
        self.reader
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time: Time {
                        seconds: position_seconds as u64,
                        frac: position_seconds.fract(),
                    },
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| AppError::Decode(format!("seek failed: {}", e)))?;
        // Decoder state is stale across a seek.
        self.decoder.reset();
        Ok(())
    }

    /// The next packet's samples, or `None` at end of stream. Corrupt
    /// packets are skipped rather than ending playback.
    pub fn decode_next(&mut self) -> AppResult<Option<DecodedSamples>> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(AppError::Decode(format!("packet read failed: {}", e))),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(message)) => {
                    log::warn!("skipping undecodable packet: {}", message);
                    continue;
                }
                Err(e) => return Err(AppError::Decode(format!("decode failed: {}", e))),
            };

            let spec = *decoded.spec();
            let mut interleaved = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
            interleaved.copy_interleaved_ref(decoded);

            return Ok(Some(DecodedSamples {
                samples: interleaved.samples().to_vec(),
                sample_rate: spec.rate,
                channels: spec.channels.count(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_strings_map_to_container_extensions() {
        assert_eq!(hint_extension("flac"), Some("flac"));
        assert_eq!(hint_extension("flac_hires"), Some("flac"));
        assert_eq!(hint_extension("mp4a.40.2"), Some("m4a"));
        assert_eq!(hint_extension("heaacv1"), Some("m4a"));
        assert_eq!(hint_extension("mp3"), Some("mp3"));
        assert_eq!(hint_extension("opus"), None);
    }
}
