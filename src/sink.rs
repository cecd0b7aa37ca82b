use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::ValueEnum;
use image::codecs::gif::{GifEncoder, Repeat as GifRepeat};
use image::{Delay, DynamicImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::video::frame::Frame;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    #[default]
    Gif,
    Mp4,
    Avi,
}

impl VideoFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gif => "gif",
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub directory: PathBuf,
    #[serde(default)]
    pub format: VideoFormat,
    /// Encoder name for container formats, e.g. `libx264` or `mpeg4`.
    #[serde(default)]
    pub codec: Option<String>,
}

impl SinkConfig {
    pub fn output_path(&self, stem: &str) -> PathBuf {
        self.directory
            .join(format!("{stem}.{}", self.format.extension()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SinkOutcome {
    Written { path: PathBuf, frames: usize },
    /// Finished without any frame; the file was not kept.
    Discarded { path: PathBuf },
}

pub trait VideoSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    fn finish(self: Box<Self>) -> Result<SinkOutcome>;
}

/// Deferred sink construction, invoked once the output geometry is known.
pub trait SinkOpener {
    fn open(&self, width: u32, height: u32) -> Result<Box<dyn VideoSink>>;
}

impl<F> SinkOpener for F
where
    F: Fn(u32, u32) -> Result<Box<dyn VideoSink>>,
{
    fn open(&self, width: u32, height: u32) -> Result<Box<dyn VideoSink>> {
        self(width, height)
    }
}

#[derive(Debug, Clone)]
pub struct OutputTarget<'a> {
    pub config: &'a SinkConfig,
    pub stem: String,
    pub frame_delay_ms: f64,
}

impl SinkOpener for OutputTarget<'_> {
    fn open(&self, width: u32, height: u32) -> Result<Box<dyn VideoSink>> {
        let path = self.config.output_path(&self.stem);
        fs::create_dir_all(&self.config.directory)
            .map_err(|err| IngestError::io(&self.config.directory, err))?;
        debug!(
            path = %path.display(),
            format = ?self.config.format,
            width,
            height,
            "opening video sink"
        );
        match self.config.format {
            VideoFormat::Gif => Ok(Box::new(GifSink::create(
                &path,
                width,
                height,
                self.frame_delay_ms,
            )?)),
            #[cfg(feature = "ffmpeg")]
            format @ (VideoFormat::Mp4 | VideoFormat::Avi) => Ok(Box::new(
                ffmpeg_sink::FfmpegSink::create(
                    &path,
                    format,
                    self.config.codec.as_deref(),
                    width,
                    height,
                    self.frame_delay_ms,
                )?,
            )),
            #[cfg(not(feature = "ffmpeg"))]
            format @ (VideoFormat::Mp4 | VideoFormat::Avi) => Err(IngestError::UnsupportedOutput(
                format!(
                    "{} output requires the `ffmpeg` feature",
                    format.extension()
                ),
            )),
        }
    }
}

/// Temporary output file renamed onto its target on commit.
struct PartialOutput {
    partial: PathBuf,
    target: PathBuf,
    settled: bool,
}

impl PartialOutput {
    fn new(target: &Path) -> Self {
        let mut partial = target.as_os_str().to_owned();
        partial.push(".partial");
        Self {
            partial: PathBuf::from(partial),
            target: target.to_path_buf(),
            settled: false,
        }
    }

    fn create(&self) -> Result<File> {
        File::create(&self.partial).map_err(|err| IngestError::io(&self.partial, err))
    }

    fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.partial, &self.target)
            .map_err(|err| IngestError::io(&self.target, err))?;
        self.settled = true;
        Ok(self.target.clone())
    }

    fn discard(mut self) -> PathBuf {
        let _ = fs::remove_file(&self.partial);
        self.settled = true;
        self.target.clone()
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.settled {
            debug!(path = %self.partial.display(), "removing unfinished output");
            let _ = fs::remove_file(&self.partial);
        }
    }
}

fn check_geometry(frame: &Frame, width: u32, height: u32) -> Result<()> {
    if (frame.width(), frame.height()) != (width, height) {
        return Err(IngestError::Encode(format!(
            "frame is {}x{}, sink expects {width}x{height}",
            frame.width(),
            frame.height()
        )));
    }
    Ok(())
}

/// Writer that keeps the first I/O failure, including one raised while an
/// encoder flushes from inside `Drop`.
struct CheckedWriter<W> {
    inner: W,
    failure: Arc<Mutex<Option<io::Error>>>,
}

impl<W: Write> CheckedWriter<W> {
    fn new(inner: W) -> (Self, Arc<Mutex<Option<io::Error>>>) {
        let failure = Arc::new(Mutex::new(None));
        let writer = Self {
            inner,
            failure: Arc::clone(&failure),
        };
        (writer, failure)
    }

    fn check<T>(&self, result: io::Result<T>) -> io::Result<T> {
        if let Err(err) = &result
            && let Ok(mut slot) = self.failure.lock()
            && slot.is_none()
        {
            *slot = Some(io::Error::new(err.kind(), err.to_string()));
        }
        result
    }
}

impl<W: Write> Write for CheckedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.inner.write(buf);
        self.check(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.inner.flush();
        self.check(result)
    }
}

fn take_failure(failure: &Mutex<Option<io::Error>>) -> Option<io::Error> {
    match failure.lock() {
        Ok(mut slot) => slot.take(),
        Err(_) => Some(io::Error::other("writer state poisoned")),
    }
}

pub struct GifSink {
    // Declared before `output` so the encoder is dropped, and the file
    // closed, before the partial file is cleaned up.
    encoder: Option<GifEncoder<BufWriter<CheckedWriter<File>>>>,
    failure: Arc<Mutex<Option<io::Error>>>,
    file: File,
    output: PartialOutput,
    width: u32,
    height: u32,
    delay: Delay,
    frames: usize,
}

impl GifSink {
    pub fn create(path: &Path, width: u32, height: u32, frame_delay_ms: f64) -> Result<Self> {
        let output = PartialOutput::new(path);
        let file = output.create()?;
        let handle = file
            .try_clone()
            .map_err(|err| IngestError::io(&output.partial, err))?;
        let (writer, failure) = CheckedWriter::new(file);
        let mut encoder = GifEncoder::new(BufWriter::new(writer));
        encoder.set_repeat(GifRepeat::Infinite)?;
        let delay_ms = if frame_delay_ms.is_finite() && frame_delay_ms > 0.0 {
            frame_delay_ms
        } else {
            0.0
        };
        Ok(Self {
            encoder: Some(encoder),
            failure,
            file: handle,
            output,
            width,
            height,
            delay: Delay::from_saturating_duration(Duration::from_secs_f64(delay_ms / 1000.0)),
            frames: 0,
        })
    }
}

impl VideoSink for GifSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        check_geometry(frame, self.width, self.height)?;
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| IngestError::Encode("GIF sink already closed".into()))?;
        let rgba = DynamicImage::ImageRgb8(frame.to_rgb_image()).into_rgba8();
        encoder.encode_frame(image::Frame::from_parts(rgba, 0, 0, self.delay))?;
        self.frames += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<SinkOutcome> {
        // Dropping the encoder writes the GIF trailer and flushes the buffer.
        drop(self.encoder.take());
        let this = *self;
        if this.frames == 0 {
            let path = this.output.discard();
            return Ok(SinkOutcome::Discarded { path });
        }
        if let Some(err) = take_failure(&this.failure) {
            return Err(IngestError::io(&this.output.partial, err));
        }
        this.file
            .sync_all()
            .map_err(|err| IngestError::io(&this.output.partial, err))?;
        let path = this.output.commit()?;
        Ok(SinkOutcome::Written {
            path,
            frames: this.frames,
        })
    }
}

#[cfg(feature = "ffmpeg")]
mod ffmpeg_sink {
    use std::path::Path;

    use ffmpeg_next as ffmpeg;
    use tracing::debug;

    use super::{PartialOutput, SinkOutcome, VideoFormat, VideoSink, check_geometry};
    use crate::error::{IngestError, Result};
    use crate::video::frame::{CHANNELS, Frame};

    fn encode_err(context: &str) -> impl Fn(ffmpeg::Error) -> IngestError + '_ {
        move |err| IngestError::Encode(format!("{context}: {err}"))
    }

    pub(super) struct FfmpegSink {
        octx: ffmpeg::format::context::Output,
        encoder: ffmpeg::encoder::Video,
        scaler: ffmpeg::software::scaling::Context,
        encoder_tb: ffmpeg::Rational,
        stream_tb: ffmpeg::Rational,
        output: PartialOutput,
        width: u32,
        height: u32,
        pts: i64,
        frames: usize,
    }

    impl FfmpegSink {
        pub(super) fn create(
            path: &Path,
            format: VideoFormat,
            codec: Option<&str>,
            width: u32,
            height: u32,
            frame_delay_ms: f64,
        ) -> Result<Self> {
            ffmpeg::init().map_err(encode_err("initialize ffmpeg"))?;
            let output = PartialOutput::new(path);
            // Created up front so the drop guard owns the path.
            drop(output.create()?);

            let mut octx = ffmpeg::format::output_as(&output.partial, format.extension())
                .map_err(encode_err("create output container"))?;
            let codec_name = codec.unwrap_or("mpeg4");
            let codec = ffmpeg::encoder::find_by_name(codec_name)
                .ok_or_else(|| IngestError::UnsupportedOutput(format!("codec '{codec_name}'")))?;

            let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .map_err(encode_err("create encoder"))?;
            let millis_per_frame = if frame_delay_ms.is_finite() && frame_delay_ms > 0.0 {
                frame_delay_ms.round().max(1.0) as i32
            } else {
                40
            };
            let time_base = ffmpeg::Rational::new(millis_per_frame, 1000);
            encoder.set_width(width);
            encoder.set_height(height);
            encoder.set_format(ffmpeg::format::Pixel::YUV420P);
            encoder.set_time_base(time_base);
            encoder.set_frame_rate(Some(time_base.invert()));
            if octx
                .format()
                .flags()
                .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER)
            {
                encoder.set_flags(ffmpeg::codec::flag::Flags::GLOBAL_HEADER);
            }
            let encoder = encoder.open().map_err(encode_err("open encoder"))?;

            let mut stream = octx.add_stream(codec).map_err(encode_err("add stream"))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(time_base);
            octx.write_header().map_err(encode_err("write header"))?;
            let stream_tb = octx
                .stream(0)
                .map(|stream| stream.time_base())
                .unwrap_or(time_base);

            let scaler = ffmpeg::software::scaling::Context::get(
                ffmpeg::format::Pixel::RGB24,
                width,
                height,
                ffmpeg::format::Pixel::YUV420P,
                width,
                height,
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .map_err(encode_err("create scaler"))?;

            debug!(codec = codec_name, width, height, "ffmpeg sink ready");
            Ok(Self {
                octx,
                encoder,
                scaler,
                encoder_tb: time_base,
                stream_tb,
                output,
                width,
                height,
                pts: 0,
                frames: 0,
            })
        }

        fn drain(&mut self) -> Result<()> {
            let mut packet = ffmpeg::Packet::empty();
            while self.encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(0);
                packet.rescale_ts(self.encoder_tb, self.stream_tb);
                packet
                    .write_interleaved(&mut self.octx)
                    .map_err(encode_err("write packet"))?;
            }
            Ok(())
        }
    }

    impl VideoSink for FfmpegSink {
        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            check_geometry(frame, self.width, self.height)?;
            let mut rgb = ffmpeg::frame::Video::new(
                ffmpeg::format::Pixel::RGB24,
                self.width,
                self.height,
            );
            let row_bytes = self.width as usize * CHANNELS;
            let stride = rgb.stride(0);
            let plane = rgb.data_mut(0);
            for y in 0..self.height {
                let offset = y as usize * stride;
                plane[offset..offset + row_bytes].copy_from_slice(frame.row(y));
            }

            let mut yuv = ffmpeg::frame::Video::empty();
            self.scaler
                .run(&rgb, &mut yuv)
                .map_err(encode_err("convert frame to YUV"))?;
            yuv.set_pts(Some(self.pts));
            self.pts += 1;
            self.encoder
                .send_frame(&yuv)
                .map_err(encode_err("send frame"))?;
            self.drain()?;
            self.frames += 1;
            Ok(())
        }

        fn finish(mut self: Box<Self>) -> Result<SinkOutcome> {
            self.encoder.send_eof().map_err(encode_err("flush encoder"))?;
            self.drain()?;
            self.octx
                .write_trailer()
                .map_err(encode_err("write trailer"))?;
            let this = *self;
            let Self { output, frames, .. } = this;
            if frames == 0 {
                return Ok(SinkOutcome::Discarded {
                    path: output.discard(),
                });
            }
            Ok(SinkOutcome::Written {
                path: output.commit()?,
                frames,
            })
        }
    }
}
