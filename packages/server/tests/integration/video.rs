use crate::common::{FakeTranscoder, TestApp, TestOptions, mp4, routes};

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn pending_then_processing_then_ready() {
        let transcoder = FakeTranscoder::gated();
        let app = TestApp::spawn_with(TestOptions {
            transcoder: transcoder.clone(),
            ..Default::default()
        })
        .await;

        let res = app.upload("alice", "clip.mp4", "video/mp4", mp4(b"clip")).await;
        assert_eq!(res.status, 201, "{}", res.text());
        assert_eq!(res.body["status"], "pending");
        assert_eq!(res.body["job"], "queued");
        let id = res.id();

        app.wait_for_status(&id, "alice", "processing").await;

        let early = app.get(&routes::content(&id), "alice").await;
        assert_eq!(early.status, 409);
        assert_eq!(early.code(), "NOT_READY");
        let early = app.get(&routes::stream(&id, "index.m3u8"), "alice").await;
        assert_eq!(early.status, 409);

        transcoder.release(1);
        app.wait_for_status(&id, "alice", "ready").await;

        let playlist = app.get(&routes::stream(&id, "index.m3u8"), "alice").await;
        assert_eq!(playlist.status, 200);
        assert_eq!(
            playlist.header("content-type"),
            Some("application/vnd.apple.mpegurl")
        );
        assert!(playlist.text().starts_with("#EXTM3U"));

        let segment = app.get(&routes::stream(&id, "index0.ts"), "alice").await;
        assert_eq!(segment.status, 200);
        assert_eq!(segment.header("content-type"), Some("video/mp2t"));

        let original = app.get(&routes::content(&id), "alice").await;
        assert_eq!(original.status, 200);
        assert_eq!(original.bytes, mp4(b"clip"));
    }

    #[tokio::test]
    async fn failed_transcode_keeps_diagnostics() {
        let app = TestApp::spawn_with(TestOptions {
            transcoder: FakeTranscoder::failing(),
            ..Default::default()
        })
        .await;

        let res = app.upload("alice", "bad.mp4", "video/mp4", mp4(b"bad")).await;
        let id = res.id();
        app.wait_for_status(&id, "alice", "failed").await;

        let log = app.blob_dir(&res.content_hash()).join("derived/transcode.log");
        let log = std::fs::read_to_string(log).unwrap();
        assert!(log.contains("Invalid data found"), "{log}");

        let content = app.get(&routes::content(&id), "alice").await;
        assert_eq!(content.status, 409);
    }

    #[tokio::test]
    async fn unknown_artifact_is_not_found() {
        let app = TestApp::spawn().await;
        let id = app.upload_ok("alice", "c.mp4", "video/mp4", mp4(b"c")).await;
        app.wait_for_status(&id, "alice", "ready").await;

        let res = app.get(&routes::stream(&id, "index99.ts"), "alice").await;
        assert_eq!(res.status, 404);
    }
}

mod dedup {
    use super::*;

    #[tokio::test]
    async fn duplicate_of_running_video_follows_it() {
        let transcoder = FakeTranscoder::gated();
        let app = TestApp::spawn_with(TestOptions {
            transcoder: transcoder.clone(),
            ..Default::default()
        })
        .await;
        let data = mp4(b"same-bytes");

        let a = app.upload("alice", "A.mp4", "video/mp4", data.clone()).await;
        let a_id = a.id();
        app.wait_for_status(&a_id, "alice", "processing").await;

        let b = app.upload("alice", "B.mp4", "video/mp4", data).await;
        assert_eq!(b.status, 201, "{}", b.text());
        assert_eq!(b.content_hash(), a.content_hash());
        assert_eq!(b.body["deduplicated"], true);
        assert_eq!(b.body["status"], "processing");
        assert_eq!(b.body["job"], "not_applicable");
        let b_id = b.id();
        assert_ne!(a_id, b_id);

        transcoder.release(1);
        app.wait_for_status(&a_id, "alice", "ready").await;
        app.wait_for_status(&b_id, "alice", "ready").await;
        assert_eq!(transcoder.calls(), 1);
    }

    #[tokio::test]
    async fn duplicate_of_ready_video_is_ready() {
        let app = TestApp::spawn().await;
        let data = mp4(b"done");

        let a = app.upload_ok("alice", "a.mp4", "video/mp4", data.clone()).await;
        app.wait_for_status(&a, "alice", "ready").await;

        let b = app.upload("bob", "b.mp4", "video/mp4", data).await;
        assert_eq!(b.body["status"], "ready");

        let playlist = app.get(&routes::stream(&b.id(), "index.m3u8"), "bob").await;
        assert_eq!(playlist.status, 200);
        assert_eq!(app.transcoder.calls(), 1);
    }

    #[tokio::test]
    async fn deleting_last_reference_removes_derived_output() {
        let app = TestApp::spawn().await;
        let res = app.upload("alice", "a.mp4", "video/mp4", mp4(b"gc")).await;
        let id = res.id();
        app.wait_for_status(&id, "alice", "ready").await;

        let blob_dir = app.blob_dir(&res.content_hash());
        assert!(blob_dir.join("derived/index.m3u8").exists());

        assert_eq!(app.delete(&routes::file(&id), "alice").await.status, 204);
        assert!(!blob_dir.exists());
    }
}

mod queue {
    use super::*;

    #[tokio::test]
    async fn full_queue_still_accepts_uploads() {
        let transcoder = FakeTranscoder::gated();
        let app = TestApp::spawn_with(TestOptions {
            transcoder: transcoder.clone(),
            workers: 1,
            queue_capacity: 1,
            ..Default::default()
        })
        .await;

        let running = app.upload("alice", "1.mp4", "video/mp4", mp4(b"1")).await;
        assert_eq!(running.body["job"], "queued");
        app.wait_for_status(&running.id(), "alice", "processing").await;

        let buffered = app.upload("alice", "2.mp4", "video/mp4", mp4(b"2")).await;
        assert_eq!(buffered.body["job"], "queued");
        assert_eq!(app.store.queue().len(), 1);

        let dropped = app.upload("alice", "3.mp4", "video/mp4", mp4(b"3")).await;
        assert_eq!(dropped.status, 201, "{}", dropped.text());
        assert_eq!(dropped.body["status"], "pending");
        assert_eq!(dropped.body["job"], "dropped");

        transcoder.release(2);
        app.wait_for_status(&running.id(), "alice", "ready").await;
        app.wait_for_status(&buffered.id(), "alice", "ready").await;
        assert_eq!(app.status_of(&dropped.id(), "alice").await, "pending");
    }
}

mod traversal {
    use super::*;

    #[tokio::test]
    async fn artifact_paths_cannot_leave_the_output_directory() {
        let app = TestApp::spawn().await;
        let data = mp4(b"secret");
        let id = app.upload_ok("alice", "s.mp4", "video/mp4", data.clone()).await;
        app.wait_for_status(&id, "alice", "ready").await;

        // `original.mp4` sits one level above the derived directory.
        for path in ["..%2Foriginal.mp4", "%2E%2E%2Foriginal.mp4", "%2Fetc%2Fpasswd"] {
            let res = app.get(&routes::stream(&id, path), "alice").await;
            assert_eq!(res.status, 404, "{path} was served");
            assert_ne!(res.bytes, data);
        }
    }
}
