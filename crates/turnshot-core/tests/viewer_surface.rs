//! Directory-backed presentation surface behavior.

use std::time::Duration;

use turnshot_core::session::{Coordinator, SourceLink};
use turnshot_core::viewer::DirectorySurfaceHost;

#[tokio::test]
async fn viewer_writes_delivered_images_into_its_session_directory() {
    let out = tempfile::tempdir().unwrap();
    let host = DirectorySurfaceHost::new(out.path());
    let target = host.target();
    let coordinator = Coordinator::spawn(host, target);
    let mut link = SourceLink::new(coordinator);

    let opened = link.open_session().await.unwrap();
    link.wait_viewer_ready(&opened.session_id, Duration::from_secs(5))
        .await
        .unwrap();

    link.send_image(&opened.session_id, "202608070930_1.png", vec![1, 2, 3])
        .await
        .unwrap();
    link.finish(&opened.session_id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let path = out
        .path()
        .join(&opened.session_id)
        .join("202608070930_1.png");
    assert_eq!(std::fs::read(path).unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn viewer_flattens_path_traversal_in_filenames() {
    let out = tempfile::tempdir().unwrap();
    let host = DirectorySurfaceHost::new(out.path());
    let target = host.target();
    let coordinator = Coordinator::spawn(host, target);
    let mut link = SourceLink::new(coordinator);

    let opened = link.open_session().await.unwrap();
    link.wait_viewer_ready(&opened.session_id, Duration::from_secs(5))
        .await
        .unwrap();

    link.send_image(&opened.session_id, "../evil.png", vec![9])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!out.path().join("evil.png").exists());
    assert!(
        out.path()
            .join(&opened.session_id)
            .join("evil.png")
            .exists()
    );
}
