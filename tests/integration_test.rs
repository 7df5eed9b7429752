use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use tempfile::TempDir;

use cell_seg_rs::mocks::{create_mock_endpoint, InMemoryObjectStore, MockEndpoint};
use cell_seg_rs::{
    Config, ErrorPolicy, MaskPipeline, ObjectLocation, PipelineError, RetrievalKind, S3Event,
    Stage,
};

type TestPipeline = MaskPipeline<InMemoryObjectStore, MockEndpoint>;

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

fn cell_png() -> Vec<u8> {
    let image = GrayImage::from_fn(640, 480, |x, y| Luma([((x + y) % 256) as u8]));
    encode(DynamicImage::ImageLuma8(image), ImageFormat::Png)
}

fn config(scratch: &TempDir) -> Config {
    Config::new("cell-seg-endpoint", "ap-southeast-2").with_scratch_dir(scratch.path())
}

fn decode_mask(bytes: &[u8]) -> GrayImage {
    image::load_from_memory(bytes).unwrap().into_luma8()
}

#[tokio::test]
async fn test_successful_event_writes_output_mask() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let store = InMemoryObjectStore::new().with_object("mybucket", "cell1.png", cell_png());
    let pipeline: TestPipeline = MaskPipeline::new(
        store,
        create_mock_endpoint().with_fill(0.9),
        config(&scratch),
    );

    let succeeded = pipeline
        .handle_event(&S3Event::for_object("mybucket", "cell1.png"))
        .await?;

    assert!(succeeded);
    assert_eq!(pipeline.endpoint().call_count(), 1);
    assert_eq!(pipeline.store().puts(), vec!["mybucket/output/cell1.png"]);

    let stored = pipeline
        .store()
        .object("mybucket", "output/cell1.png")
        .expect("mask was not written");
    let mask = decode_mask(&stored.bytes);
    assert_eq!(mask.dimensions(), (512, 512));
    assert!(mask.pixels().all(|p| p.0[0] == 255));

    // scratch file is cleaned up after upload
    assert_eq!(std::fs::read_dir(scratch.path())?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_request_payload_shape() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(33, 70, Rgb([90, 90, 90])));
    let store = InMemoryObjectStore::new().with_object(
        "mybucket",
        "cell2.jpg",
        encode(source, ImageFormat::Png),
    );
    let pipeline = MaskPipeline::new(
        store,
        create_mock_endpoint(),
        config(&scratch).with_input_key("input_3"),
    );

    pipeline
        .run(&ObjectLocation::new("mybucket", "cell2.jpg"))
        .await?;

    let requests = pipeline.endpoint().requests();
    assert_eq!(requests.len(), 1);
    let json: serde_json::Value = serde_json::from_slice(&requests[0])?;
    let object = json.as_object().unwrap();
    assert_eq!(object.keys().collect::<Vec<_>>(), vec!["input_3"]);

    let batch = json["input_3"].as_array().unwrap();
    assert_eq!(batch.len(), 1);
    let rows = batch[0].as_array().unwrap();
    assert_eq!(rows.len(), 512);
    let row = rows[0].as_array().unwrap();
    assert_eq!(row.len(), 512);
    let pixel = row[0].as_array().unwrap();
    assert_eq!(pixel.len(), 1);
    // raw intensities, not rescaled
    assert!(pixel[0].as_f64().unwrap() > 1.0);

    // jpg key keeps its name but the mask is stored losslessly
    let stored = pipeline.store().object("mybucket", "output/cell2.jpg").unwrap();
    assert_eq!(stored.content_type.as_deref(), Some("image/png"));
    Ok(())
}

#[tokio::test]
async fn test_all_zero_predictions_render_black() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let store = InMemoryObjectStore::new().with_object("mybucket", "cell1.png", cell_png());
    let pipeline = MaskPipeline::new(store, create_mock_endpoint(), config(&scratch));

    pipeline
        .run(&ObjectLocation::new("mybucket", "cell1.png"))
        .await?;

    let stored = pipeline.store().object("mybucket", "output/cell1.png").unwrap();
    assert!(decode_mask(&stored.bytes).pixels().all(|p| p.0[0] == 0));
    Ok(())
}

/// `{"predictions": ...}` with a filled disc of `radius` centred in a
/// `size × size` plane.
fn disc_predictions(size: usize, radius: f64) -> Vec<u8> {
    let centre = size as f64 / 2.0;
    let plane: Vec<Vec<Vec<f32>>> = (0..size)
        .map(|y| {
            (0..size)
                .map(|x| {
                    let (dx, dy) = (x as f64 - centre, y as f64 - centre);
                    let inside = (dx * dx + dy * dy).sqrt() <= radius;
                    vec![if inside { 0.9 } else { 0.1 }]
                })
                .collect()
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({ "predictions": [plane] })).unwrap()
}

#[tokio::test]
async fn test_jpg_key_stores_binary_mask() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let store = InMemoryObjectStore::new().with_object("mybucket", "cell.jpg", cell_png());
    let pipeline = MaskPipeline::new(
        store,
        create_mock_endpoint().with_raw_response(disc_predictions(512, 101.0)),
        config(&scratch),
    );

    let output_key = pipeline
        .run(&ObjectLocation::new("mybucket", "cell.jpg"))
        .await?;
    assert_eq!(output_key, "output/cell.jpg");

    let stored = pipeline.store().object("mybucket", "output/cell.jpg").unwrap();
    let mask = decode_mask(&stored.bytes);
    assert!(mask.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    assert!(mask.pixels().any(|p| p.0[0] == 255));
    assert!(mask.pixels().any(|p| p.0[0] == 0));
    assert_eq!(mask.get_pixel(256, 256).0[0], 255);
    assert_eq!(mask.get_pixel(0, 0).0[0], 0);
    Ok(())
}

#[tokio::test]
async fn test_long_basename_persists() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let key = format!("plates/{}.png", "a".repeat(250));
    let store = InMemoryObjectStore::new().with_object("mybucket", &key, cell_png());
    let pipeline = MaskPipeline::new(
        store,
        create_mock_endpoint().with_fill(0.9),
        config(&scratch).with_error_policy(ErrorPolicy::Propagate),
    );

    let output_key = pipeline.run(&ObjectLocation::new("mybucket", &key)).await?;

    assert_eq!(output_key, format!("output/{}.png", "a".repeat(250)));
    assert_eq!(pipeline.endpoint().call_count(), 1);
    assert!(pipeline.store().object("mybucket", &output_key).is_some());
    Ok(())
}

#[tokio::test]
async fn test_missing_object_skips_inference() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let pipeline = MaskPipeline::new(
        InMemoryObjectStore::new(),
        create_mock_endpoint(),
        config(&scratch),
    );

    let succeeded = pipeline
        .handle_event(&S3Event::for_object("mybucket", "cell1.png"))
        .await?;

    assert!(!succeeded);
    assert_eq!(pipeline.endpoint().call_count(), 0);
    assert!(pipeline.store().puts().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_object_propagates_under_propagate_policy(
) -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let pipeline = MaskPipeline::new(
        InMemoryObjectStore::new(),
        create_mock_endpoint(),
        config(&scratch).with_error_policy(ErrorPolicy::Propagate),
    );

    let err = pipeline
        .handle_event(&S3Event::for_object("mybucket", "cell1.png"))
        .await
        .unwrap_err();

    match err {
        PipelineError::Retrieval {
            bucket, key, kind, ..
        } => {
            assert_eq!(bucket, "mybucket");
            assert_eq!(key, "cell1.png");
            assert_eq!(kind, RetrievalKind::NotFound);
        }
        other => panic!("Expected Retrieval error, got {other:?}"),
    }
    assert_eq!(pipeline.endpoint().call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_malformed_inference_response() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let store = InMemoryObjectStore::new().with_object("mybucket", "cell1.png", cell_png());
    let pipeline = MaskPipeline::new(
        store,
        create_mock_endpoint().with_raw_response(&b"{\"predictions\": [[[oops"[..]),
        config(&scratch).with_error_policy(ErrorPolicy::Propagate),
    );

    let err = pipeline
        .handle_event(&S3Event::for_object("mybucket", "cell1.png"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Inference { .. }));
    assert_eq!(err.stage(), Stage::Invoking);
    assert_eq!(pipeline.endpoint().call_count(), 1);
    assert!(pipeline.store().puts().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_wrong_prediction_shape_is_inference_error() -> Result<(), Box<dyn std::error::Error>>
{
    let scratch = TempDir::new()?;
    let store = InMemoryObjectStore::new().with_object("mybucket", "cell1.png", cell_png());
    // model answers at 256 while requests are 512
    let pipeline = MaskPipeline::new(
        store,
        MockEndpoint::new(256).with_fill(1.0),
        config(&scratch).with_error_policy(ErrorPolicy::Propagate),
    );

    let err = pipeline
        .run(&ObjectLocation::new("mybucket", "cell1.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Inference { .. }));
    assert!(pipeline.store().puts().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_endpoint_failure_reports_false() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let store = InMemoryObjectStore::new().with_object("mybucket", "cell1.png", cell_png());
    let pipeline = MaskPipeline::new(store, create_mock_endpoint().failing(), config(&scratch));

    let succeeded = pipeline
        .handle_event(&S3Event::for_object("mybucket", "cell1.png"))
        .await?;
    assert!(!succeeded);
    assert!(pipeline.store().puts().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_slow_endpoint_times_out() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let store = InMemoryObjectStore::new().with_object("mybucket", "cell1.png", cell_png());
    let pipeline = MaskPipeline::new(
        store,
        create_mock_endpoint().with_delay(Duration::from_secs(120)),
        config(&scratch)
            .with_request_timeout_secs(5)
            .with_error_policy(ErrorPolicy::Propagate),
    );

    let err = pipeline
        .run(&ObjectLocation::new("mybucket", "cell1.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Inference { .. }));
    assert!(pipeline.store().puts().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_encoded_key_is_decoded_before_fetch() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let store = InMemoryObjectStore::new().with_object(
        "mybucket",
        "plates/my cell (1).png",
        cell_png(),
    );
    let pipeline = MaskPipeline::new(store, create_mock_endpoint(), config(&scratch));

    let event = S3Event::from_json(
        r#"{"Records":[{"s3":{"bucket":{"name":"mybucket"},
            "object":{"key":"plates/my+cell+%281%29.png"}}}]}"#,
    )?;
    assert!(pipeline.handle_event(&event).await?);
    assert_eq!(pipeline.store().puts(), vec!["mybucket/output/my cell (1).png"]);
    Ok(())
}

#[tokio::test]
async fn test_only_first_record_is_processed() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let store = InMemoryObjectStore::new()
        .with_object("mybucket", "a.png", cell_png())
        .with_object("mybucket", "b.png", cell_png());
    let pipeline = MaskPipeline::new(store, create_mock_endpoint(), config(&scratch));

    let mut event = S3Event::for_object("mybucket", "a.png");
    event
        .records
        .extend(S3Event::for_object("mybucket", "b.png").records);

    assert!(pipeline.handle_event(&event).await?);
    assert_eq!(pipeline.store().puts(), vec!["mybucket/output/a.png"]);
    assert_eq!(pipeline.endpoint().call_count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_duplicate_events() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = TempDir::new()?;
    let store = InMemoryObjectStore::new().with_object("mybucket", "cell1.png", cell_png());
    let pipeline = Arc::new(MaskPipeline::new(
        store,
        create_mock_endpoint().with_fill(0.7),
        config(&scratch),
    ));
    let event = S3Event::for_object("mybucket", "cell1.png");

    let first = {
        let pipeline = Arc::clone(&pipeline);
        let event = event.clone();
        tokio::spawn(async move { pipeline.handle_event(&event).await })
    };
    let second = {
        let pipeline = Arc::clone(&pipeline);
        let event = event.clone();
        tokio::spawn(async move { pipeline.handle_event(&event).await })
    };

    assert!(first.await??);
    assert!(second.await??);

    // both writes land on the same key; the last one wins
    assert_eq!(pipeline.store().puts().len(), 2);
    assert_eq!(pipeline.store().object_count(), 2);
    let stored = pipeline.store().object("mybucket", "output/cell1.png").unwrap();
    assert!(decode_mask(&stored.bytes).pixels().all(|p| p.0[0] == 255));
    Ok(())
}
