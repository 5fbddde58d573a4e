//! Formatting and buffer behaviour through the public registry API.

use std::io::Cursor;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use thermolink::protocol::charset::TextEncoding;
use thermolink::protocol::commands::{ESC, GS};
use thermolink::protocol::graphics::Dpi;
use thermolink::protocol::text::{Alignment, Toggle};
use thermolink::protocol::{CommandEncoder, EscPosEncoder};
use thermolink::transport::{MockTransport, event_channel};
use thermolink::{ConnectionRegistry, EventHub, Operation, SessionId, ThermolinkError, TransportEventRouter};

struct Harness {
    mock: Arc<MockTransport>,
    registry: Arc<ConnectionRegistry>,
}

fn harness() -> Harness {
    let (tx, rx) = event_channel();
    let mock = Arc::new(MockTransport::new(tx).with_auto_connect());
    let registry = Arc::new(ConnectionRegistry::new(
        mock.clone(),
        Arc::new(EscPosEncoder),
        EventHub::new(),
    ));
    TransportEventRouter::new(registry.clone(), rx).spawn();
    Harness { mock, registry }
}

async fn open(h: &Harness, address: &str, encoding: &str) -> Option<SessionId> {
    let identity = h
        .registry
        .connect(address, Some(encoding))
        .await
        .unwrap()
        .unwrap();
    let id = Some(identity.connection_id);
    h.registry.begin(id).await.unwrap();
    id
}

fn png_base64(width: u32, height: u32) -> String {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])));
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    STANDARD.encode(png)
}

/// Layout a fresh job starts with: left align, 30-dot lines, 1-dot spacing.
const BASELINE: [u8; 9] = [ESC, b'a', 0, ESC, b'3', 30, ESC, b' ', 1];

#[tokio::test]
async fn test_begin_is_deterministic_across_sessions() {
    let h = harness();
    let a = open(&h, "66:22:B3:4C:1D:01", "GBK").await;
    let b = open(&h, "66:22:B3:4C:1D:02", "UTF-8").await;

    assert_eq!(h.registry.buffered(a).await.unwrap(), BASELINE.to_vec());
    assert_eq!(
        h.registry.buffered(a).await.unwrap(),
        h.registry.buffered(b).await.unwrap()
    );
}

#[tokio::test]
async fn test_begin_discards_previous_job() {
    let h = harness();
    let id = open(&h, "66:22:B3:4C:1D:01", "GBK").await;

    h.registry
        .apply_all(
            id,
            &[
                Operation::Bold { enabled: Toggle::Enable },
                Operation::Text { text: Some("hello".into()) },
                Operation::Align { alignment: "right".into() },
            ],
        )
        .await
        .unwrap();
    assert_ne!(h.registry.buffered(id).await.unwrap(), BASELINE.to_vec());

    h.registry.begin(id).await.unwrap();
    assert_eq!(h.registry.buffered(id).await.unwrap(), BASELINE.to_vec());
    let formatting = h.registry.formatting(id).await.unwrap();
    assert_eq!(formatting.text.bold, Toggle::Disable);
    assert_eq!(formatting.alignment, Alignment::Left);
}

#[tokio::test]
async fn test_align_round_trip() {
    let h = harness();
    let id = open(&h, "66:22:B3:4C:1D:01", "GBK").await;

    h.registry
        .apply(id, &Operation::Align { alignment: "center".into() })
        .await
        .unwrap();
    assert_eq!(h.registry.formatting(id).await.unwrap().alignment, Alignment::Center);

    let bytes = h.registry.buffered(id).await.unwrap();
    assert_eq!(&bytes[BASELINE.len()..], &[ESC, b'a', 1]);

    assert!(matches!(
        h.registry
            .apply(id, &Operation::Align { alignment: "middle".into() })
            .await,
        Err(ThermolinkError::InvalidArgument(_))
    ));
    assert_eq!(h.registry.formatting(id).await.unwrap().alignment, Alignment::Center);
}

#[tokio::test]
async fn test_spacing_is_clamped() {
    let h = harness();
    let id = open(&h, "66:22:B3:4C:1D:01", "GBK").await;

    h.registry
        .apply(id, &Operation::LineSpacing { line_spacing: 300 })
        .await
        .unwrap();
    assert_eq!(h.registry.formatting(id).await.unwrap().line_spacing, 255);

    h.registry
        .apply(id, &Operation::LineSpacing { line_spacing: -5 })
        .await
        .unwrap();
    assert_eq!(h.registry.formatting(id).await.unwrap().line_spacing, 0);

    let bytes = h.registry.buffered(id).await.unwrap();
    assert_eq!(&bytes[BASELINE.len()..], &[ESC, b'3', 255, ESC, b'3', 0]);
}

#[tokio::test]
async fn test_width_limit_and_images() {
    let h = harness();
    let id = open(&h, "66:22:B3:4C:1D:01", "GBK").await;
    let image = png_base64(16, 4);

    h.registry
        .apply(id, &Operation::LimitWidth { width: Some(48) })
        .await
        .unwrap();
    assert_eq!(h.registry.formatting(id).await.unwrap().bitmap.width_limit, 384);

    h.registry
        .apply(id, &Operation::Image { image: Some(image.clone()) })
        .await
        .unwrap();
    let bytes = h.registry.buffered(id).await.unwrap();
    let raster = &bytes[BASELINE.len()..];
    // GS v 0, normal mode, 2 bytes wide, 4 rows, all black
    assert_eq!(&raster[..8], &[GS, b'v', b'0', 0, 2, 0, 4, 0]);
    assert_eq!(&raster[8..], &[0xFF; 8]);

    h.registry
        .apply_all(
            id,
            &[
                Operation::Dpi { dpi: Some(300) },
                Operation::LimitWidth { width: Some(48) },
            ],
        )
        .await
        .unwrap();
    // DPI is stored on its own and does not change the ×8 scaling
    let formatting = h.registry.formatting(id).await.unwrap();
    assert_eq!(formatting.bitmap.dpi, Dpi::Dpi300);
    assert_eq!(formatting.bitmap.width_limit, 384);

    h.registry
        .apply(id, &Operation::LimitWidth { width: Some(0) })
        .await
        .unwrap();
    assert_eq!(h.registry.formatting(id).await.unwrap().bitmap.width_limit, 0);
    let before = h.registry.buffered(id).await.unwrap();
    h.registry
        .apply(id, &Operation::Image { image: Some(image) })
        .await
        .unwrap();
    assert_eq!(h.registry.buffered(id).await.unwrap(), before);

    assert!(matches!(
        h.registry
            .apply(id, &Operation::Image { image: Some("not an image".into()) })
            .await,
        Err(ThermolinkError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_failed_operation_leaves_buffer_intact() {
    let h = harness();
    let id = open(&h, "66:22:B3:4C:1D:01", "GBK").await;

    let result = h
        .registry
        .apply_all(
            id,
            &[
                Operation::Beep,
                Operation::Barcode { kind: "QR".into(), data: "123".into() },
                Operation::OpenDrawer,
            ],
        )
        .await;
    assert!(matches!(result, Err(ThermolinkError::InvalidArgument(_))));

    let mut expected = BASELINE.to_vec();
    expected.extend(EscPosEncoder.beep());
    assert_eq!(h.registry.buffered(id).await.unwrap(), expected);
}

#[tokio::test]
async fn test_write_wraps_job_in_envelope() {
    let h = harness();
    let id = open(&h, "66:22:B3:4C:1D:01", "UTF-8").await;
    h.registry
        .apply_all(
            id,
            &[
                Operation::Raw { data: thermolink::session::RawData::Bytes(vec![0x41, 0x142, -1]) },
                Operation::CutPaper { half: true },
            ],
        )
        .await
        .unwrap();
    let job = h.registry.buffered(id).await.unwrap();
    assert_eq!(&job[BASELINE.len()..BASELINE.len() + 3], &[0x41, 0x42, 0xFF]);

    h.registry.write(id).await.unwrap();
    // Flushing does not consume the buffer
    assert_eq!(h.registry.buffered(id).await.unwrap(), job);

    let encoder = EscPosEncoder;
    let mut expected = encoder.header();
    expected.extend(encoder.charset(TextEncoding::Utf8));
    expected.extend(&job);
    for _ in 0..3 {
        expected.extend(encoder.terminator());
    }
    expected.extend(encoder.end());

    let handle = h.mock.handle_for("66:22:B3:4C:1D:01").unwrap();
    assert_eq!(h.mock.writes(handle), vec![expected]);
}

#[tokio::test]
async fn test_set_encoding_validation() {
    let h = harness();
    let id = open(&h, "66:22:B3:4C:1D:01", "latin1").await;
    assert_eq!(h.registry.formatting(id).await.unwrap().encoding, TextEncoding::Gbk);

    assert!(matches!(
        h.registry
            .apply(id, &Operation::SetEncoding { encoding: "latin1".into() })
            .await,
        Err(ThermolinkError::InvalidArgument(_))
    ));
    h.registry
        .apply(id, &Operation::SetEncoding { encoding: "UTF-8".into() })
        .await
        .unwrap();
    assert_eq!(h.registry.formatting(id).await.unwrap().encoding, TextEncoding::Utf8);

    // Encoding survives a new job
    h.registry.begin(id).await.unwrap();
    assert_eq!(h.registry.formatting(id).await.unwrap().encoding, TextEncoding::Utf8);
}
