use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, DynamicImage, Frames, ImageFormat, ImageReader};
use tracing::debug;

use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{IngestError, Result};
use crate::video::frame::Frame;

const SNIFF_LEN: usize = 64;

pub trait FrameReader {
    /// Next frame, or `None` once the stream is exhausted.
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

pub struct AnimationReader {
    frames: Frames<'static>,
}

impl AnimationReader {
    pub fn new<D>(decoder: D) -> Self
    where
        D: AnimationDecoder<'static>,
    {
        Self {
            frames: decoder.into_frames(),
        }
    }
}

impl FrameReader for AnimationReader {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(frame) = self.frames.next() else {
            return Ok(None);
        };
        let rgba = frame?.into_buffer();
        Ok(Some(Frame::from_rgb_image(
            DynamicImage::ImageRgba8(rgba).into_rgb8(),
        )))
    }
}

pub struct StillReader {
    frame: Option<Frame>,
}

impl StillReader {
    pub fn new(frame: Frame) -> Self {
        Self { frame: Some(frame) }
    }
}

impl FrameReader for StillReader {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frame.take())
    }
}

/// Stands in for a stream that could not be opened: reports the failure once,
/// then ends.
pub struct UnopenedReader {
    error: Option<IngestError>,
}

impl FrameReader for UnopenedReader {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

/// Opens `path` as a frame stream. Anything that cannot be opened yields an
/// [`UnopenedReader`] carrying the reason.
pub fn open_stream(path: &Path) -> Box<dyn FrameReader> {
    match try_open(path) {
        Ok(reader) => reader,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "stream could not be opened");
            Box::new(UnopenedReader { error: Some(err) })
        }
    }
}

fn sniff(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|err| IngestError::io(path, err))?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut header)
        .map_err(|err| IngestError::io(path, err))?;
    Ok(header)
}

fn buffered(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| IngestError::io(path, err))
}

fn try_open(path: &Path) -> Result<Box<dyn FrameReader>> {
    let header = sniff(path)?;
    let format = image::guess_format(&header).ok();
    debug!(path = %path.display(), format = ?format, "sniffed raw stream");

    match format {
        Some(ImageFormat::Gif) => Ok(Box::new(AnimationReader::new(GifDecoder::new(
            buffered(path)?,
        )?))),
        Some(ImageFormat::Png) => {
            let decoder = PngDecoder::new(buffered(path)?)?;
            if decoder.is_apng()? {
                Ok(Box::new(AnimationReader::new(decoder.apng()?)))
            } else {
                open_still(path)
            }
        }
        Some(ImageFormat::WebP) => {
            let decoder = WebPDecoder::new(buffered(path)?)?;
            if decoder.has_animation() {
                Ok(Box::new(AnimationReader::new(decoder)))
            } else {
                open_still(path)
            }
        }
        Some(_) => open_still(path),
        None => open_container(path),
    }
}

fn open_still(path: &Path) -> Result<Box<dyn FrameReader>> {
    let image = ImageReader::open(path)
        .map_err(|err| IngestError::io(path, err))?
        .with_guessed_format()
        .map_err(|err| IngestError::io(path, err))?
        .decode()?;
    Ok(Box::new(StillReader::new(Frame::from_rgb_image(
        image.into_rgb8(),
    ))))
}

#[cfg(feature = "ffmpeg")]
fn open_container(path: &Path) -> Result<Box<dyn FrameReader>> {
    Ok(Box::new(ffmpeg_reader::FfmpegReader::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_container(path: &Path) -> Result<Box<dyn FrameReader>> {
    Err(IngestError::UnsupportedPixelData(format!(
        "{} is not a recognised image stream and video decoding requires the `ffmpeg` feature",
        path.display()
    )))
}

#[cfg(feature = "ffmpeg")]
mod ffmpeg_reader {
    use std::collections::VecDeque;
    use std::path::Path;

    use ffmpeg_next as ffmpeg;

    use super::FrameReader;
    use crate::error::{IngestError, Result};
    use crate::video::frame::{CHANNELS, Frame};

    fn decode_err(context: &'static str) -> impl Fn(ffmpeg::Error) -> IngestError {
        move |err| IngestError::UnsupportedPixelData(format!("{context}: {err}"))
    }

    pub(super) struct FfmpegReader {
        input: ffmpeg::format::context::Input,
        stream_index: usize,
        decoder: ffmpeg::codec::decoder::Video,
        scaler: ffmpeg::software::scaling::Context,
        pending: VecDeque<Frame>,
        flushed: bool,
    }

    impl FfmpegReader {
        pub(super) fn open(path: &Path) -> Result<Self> {
            ffmpeg::init().map_err(decode_err("initialize ffmpeg"))?;
            let input = ffmpeg::format::input(&path).map_err(decode_err("open input"))?;
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| IngestError::UnsupportedPixelData("no video track".into()))?;
            let stream_index = stream.index();
            let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(decode_err("load decoder parameters"))?
                .decoder()
                .video()
                .map_err(decode_err("open video decoder"))?;
            let scaler = ffmpeg::software::scaling::Context::get(
                decoder.format(),
                decoder.width(),
                decoder.height(),
                ffmpeg::format::Pixel::RGB24,
                decoder.width(),
                decoder.height(),
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .map_err(decode_err("create scaler"))?;
            Ok(Self {
                input,
                stream_index,
                decoder,
                scaler,
                pending: VecDeque::new(),
                flushed: false,
            })
        }

        fn receive(&mut self) -> Result<()> {
            let mut decoded = ffmpeg::frame::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb)
                    .map_err(decode_err("scale frame to RGB"))?;
                self.pending.push_back(to_frame(&rgb)?);
            }
            Ok(())
        }
    }

    impl FrameReader for FfmpegReader {
        fn read_frame(&mut self) -> Result<Option<Frame>> {
            while self.pending.is_empty() && !self.flushed {
                let next = self
                    .input
                    .packets()
                    .find(|(stream, _)| stream.index() == self.stream_index);
                match next {
                    Some((_, packet)) => {
                        self.decoder
                            .send_packet(&packet)
                            .map_err(decode_err("send packet"))?;
                    }
                    None => {
                        self.decoder.send_eof().map_err(decode_err("flush decoder"))?;
                        self.flushed = true;
                    }
                }
                self.receive()?;
            }
            Ok(self.pending.pop_front())
        }
    }

    fn to_frame(rgb: &ffmpeg::frame::Video) -> Result<Frame> {
        let (width, height) = (rgb.width(), rgb.height());
        let row_bytes = width as usize * CHANNELS;
        let stride = rgb.stride(0);
        let plane = rgb.data(0);
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let bytes = plane.get(start..start + row_bytes).ok_or_else(|| {
                IngestError::UnsupportedPixelData("decoded row is out of bounds".into())
            })?;
            data.extend_from_slice(bytes);
        }
        Frame::new(width, height, data)
    }
}

/// Reads `reader` to the end. A failure ends the stream at the last good
/// frame. An empty result is recorded as a warning naming that failure.
pub fn ingest_raw(
    reader: &mut dyn FrameReader,
    source: &str,
    diagnostics: &mut Diagnostics,
) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut failure = None;
    loop {
        match reader.read_frame() {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => break,
            Err(err) => {
                debug!(source, decoded = frames.len(), error = %err, "stream ended on decode error");
                failure = Some(err.to_string());
                break;
            }
        }
    }
    if frames.is_empty() {
        diagnostics.record(Warning::EmptyResult {
            source: source.to_string(),
            reason: failure,
        });
    }
    debug!(source, frames = frames.len(), "raw stream read");
    frames
}
