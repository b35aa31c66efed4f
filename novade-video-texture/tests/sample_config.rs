use std::path::Path;

use novade_video_texture::config::{PlayerConfig, SourceConfig};
use novade_video_texture::PixelFormat;

#[test]
fn shipped_configuration_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("video-texture.toml");
    let config = PlayerConfig::load(&path).unwrap();

    let SourceConfig::Capture(capture) = &config.source else {
        panic!("sample configuration should capture, got {:?}", config.source);
    };
    assert_eq!(capture.pixel_format, PixelFormat::Rgb24);
    assert_eq!(capture.buffer_count, 4);
    assert!(capture.record_path.is_none());
    assert_eq!(config, PlayerConfig::default());
}
