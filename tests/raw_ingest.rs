use anyhow::Result;
use image::codecs::gif::GifEncoder;
use image::{Delay, Rgba, RgbaImage};
use sonoclip::diagnostics::Warning;
use sonoclip::{IngestOptions, SourceKind, ingest};
use tempfile::tempdir;

fn write_gif(path: &std::path::Path, frames: u8) -> Result<()> {
    let mut encoder = GifEncoder::new(std::fs::File::create(path)?);
    for index in 0..frames {
        let shade = index * 20;
        let image = RgbaImage::from_pixel(8, 6, Rgba([shade, 0, 255 - shade, 255]));
        encoder.encode_frame(image::Frame::from_parts(
            image,
            0,
            0,
            Delay::from_numer_denom_ms(50, 1),
        ))?;
    }
    Ok(())
}

#[test]
fn plain_video_keeps_every_frame_in_order() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("clip.gif");
    write_gif(&path, 7)?;

    let video = ingest(&path, &IngestOptions::default())?;
    assert_eq!(video.kind(), SourceKind::Raw);
    assert_eq!(video.len(), 7);
    assert_eq!(video.frame_size(), Some((6, 8)));
    assert!(video.metadata().is_none());
    for (index, frame) in video.iter().enumerate() {
        let shade = index as u8 * 20;
        assert_eq!(frame.pixel(3, 3), Some([shade, 0, 255 - shade]));
    }
    Ok(())
}

#[test]
fn unreadable_file_gives_empty_video_and_one_warning() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("garbage.mp4");
    std::fs::write(&path, vec![0x5a; 4096])?;

    let video = ingest(&path, &IngestOptions::default())?;
    assert_eq!(video.len(), 0);
    assert!(video.is_empty());
    assert_eq!(video.frame_size(), None);
    assert_eq!(video.diagnostics().len(), 1);
    let Warning::EmptyResult { reason, .. } = &video.diagnostics().warnings()[0] else {
        panic!("expected an empty-result warning: {:?}", video.diagnostics());
    };
    let reason = reason.as_deref().unwrap_or_default();
    assert!(!reason.is_empty());
    #[cfg(not(feature = "ffmpeg"))]
    assert!(reason.contains("`ffmpeg` feature"), "{reason}");
    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    assert!(ingest(&dir.path().join("absent.gif"), &IngestOptions::default()).is_err());
}
