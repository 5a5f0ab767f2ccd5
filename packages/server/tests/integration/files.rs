use crate::common::{TestApp, TestOptions, png, routes};

mod upload {
    use super::*;

    #[tokio::test]
    async fn image_is_ready_immediately() {
        let app = TestApp::spawn().await;
        let data = png(b"holiday");

        let res = app.upload("alice", "holiday.png", "image/png", data.clone()).await;

        assert_eq!(res.status, 201, "{}", res.text());
        assert_eq!(res.body["status"], "ready");
        assert_eq!(res.body["deduplicated"], false);
        assert_eq!(res.body["job"], "not_applicable");
        assert_eq!(res.body["name"], "holiday.png");
        assert_eq!(res.body["size"].as_u64().unwrap(), data.len() as u64);

        let id = res.id();
        let content = app.get(&routes::content(&id), "alice").await;
        assert_eq!(content.status, 200);
        assert_eq!(content.bytes, data);
        assert_eq!(content.header("content-type"), Some("image/png"));
        assert!(
            content
                .header("content-disposition")
                .unwrap()
                .contains("holiday.png")
        );
    }

    #[tokio::test]
    async fn identical_bytes_are_stored_once() {
        let app = TestApp::spawn().await;
        let data = png(b"shared");

        let first = app.upload("alice", "a.png", "image/png", data.clone()).await;
        let second = app.upload("alice", "b.png", "image/png", data.clone()).await;
        let third = app.upload("bob", "c.png", "image/png", data).await;

        for res in [&first, &second, &third] {
            assert_eq!(res.status, 201, "{}", res.text());
        }
        assert_eq!(first.body["deduplicated"], false);
        assert_eq!(second.body["deduplicated"], true);
        assert_eq!(third.body["deduplicated"], true);
        assert_eq!(second.body["status"], "ready");

        let hash = first.content_hash();
        assert_eq!(second.content_hash(), hash);
        assert_eq!(third.content_hash(), hash);

        let ids = [first.id(), second.id(), third.id()];
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert_ne!(ids[0], ids[2]);
        assert_eq!(app.references(&hash).await, 3);

        let entries: Vec<_> = std::fs::read_dir(app.blob_dir(&hash))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["original.png".to_string()]);
    }

    #[tokio::test]
    async fn different_bytes_get_different_blobs() {
        let app = TestApp::spawn().await;

        let a = app.upload("alice", "x.png", "image/png", png(b"one")).await;
        let b = app.upload("alice", "x.png", "image/png", png(b"two")).await;

        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(b.body["deduplicated"], false);
    }

    #[tokio::test]
    async fn filename_is_sanitized() {
        let app = TestApp::spawn().await;

        let res = app
            .upload("alice", "../../etc/my photo.png", "image/png", png(b"x"))
            .await;

        assert_eq!(res.status, 201, "{}", res.text());
        assert_eq!(res.body["name"], "my-photo.png");
    }

    #[tokio::test]
    async fn disallowed_type_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app
            .upload("alice", "notes.txt", "text/plain", b"hello".to_vec())
            .await;

        assert_eq!(res.status, 415);
        assert_eq!(res.code(), "UNSUPPORTED_MEDIA_TYPE");
    }

    #[tokio::test]
    async fn content_must_match_declared_type() {
        let app = TestApp::spawn().await;

        let res = app
            .upload("alice", "fake.png", "image/png", b"definitely not a png".to_vec())
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.upload("alice", "empty.png", "image/png", Vec::new()).await;

        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let app = TestApp::spawn_with(TestOptions {
            max_upload_size: 1024,
            ..Default::default()
        })
        .await;

        let res = app
            .upload("alice", "big.png", "image/png", png(&[7u8; 4096]))
            .await;

        assert_eq!(res.status, 413);
        assert_eq!(res.code(), "PAYLOAD_TOO_LARGE");

        // Nothing was left behind in the staging area.
        let temp = app.store.blobs().root().join(".tmp");
        assert_eq!(std::fs::read_dir(temp).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn identity_header_is_required() {
        let app = TestApp::spawn().await;
        let id = app.upload_ok("alice", "a.png", "image/png", png(b"a")).await;

        let res = app.get_without_owner(&routes::file(&id)).await;

        assert_eq!(res.status, 401);
        assert_eq!(res.code(), "OWNER_MISSING");
    }
}

mod access {
    use super::*;

    #[tokio::test]
    async fn metadata_is_owner_scoped() {
        let app = TestApp::spawn().await;
        let id = app.upload_ok("alice", "a.png", "image/png", png(b"a")).await;

        let mine = app.get(&routes::file(&id), "alice").await;
        assert_eq!(mine.status, 200);
        assert_eq!(mine.body["id"], id.as_str());

        let theirs = app.get(&routes::file(&id), "mallory").await;
        assert_eq!(theirs.status, 404);
        let content = app.get(&routes::content(&id), "mallory").await;
        assert_eq!(content.status, 404);
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids() {
        let app = TestApp::spawn().await;

        let res = app
            .get(&routes::file("01936f0e-1234-7abc-8000-000000000001"), "alice")
            .await;
        assert_eq!(res.status, 404);

        let res = app.get(&routes::file("not-a-uuid"), "alice").await;
        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn etag_revalidation() {
        let app = TestApp::spawn().await;
        let res = app.upload("alice", "a.png", "image/png", png(b"cache")).await;
        let id = res.id();
        let etag = format!("\"{}\"", res.content_hash());

        let first = app.get(&routes::content(&id), "alice").await;
        assert_eq!(first.header("etag"), Some(etag.as_str()));

        let cached = app
            .get_with_headers(&routes::content(&id), "alice", &[("If-None-Match", &etag)])
            .await;
        assert_eq!(cached.status, 304);
        assert!(cached.bytes.is_empty());
    }
}

mod delete {
    use super::*;

    #[tokio::test]
    async fn blob_survives_until_last_reference_is_gone() {
        let app = TestApp::spawn().await;
        let data = png(b"refcount");

        let first = app.upload("alice", "a.png", "image/png", data.clone()).await;
        let second = app.upload("bob", "b.png", "image/png", data.clone()).await;
        let hash = first.content_hash();
        let blob_dir = app.blob_dir(&hash);

        let res = app.delete(&routes::file(&first.id()), "alice").await;
        assert_eq!(res.status, 204);
        assert!(blob_dir.join("original.png").exists());
        assert_eq!(app.references(&hash).await, 1);

        let gone = app.get(&routes::file(&first.id()), "alice").await;
        assert_eq!(gone.status, 404);

        let content = app.get(&routes::content(&second.id()), "bob").await;
        assert_eq!(content.status, 200);
        assert_eq!(content.bytes, data);

        let res = app.delete(&routes::file(&second.id()), "bob").await;
        assert_eq!(res.status, 204);
        assert!(!blob_dir.exists());
        assert_eq!(app.references(&hash).await, 0);
    }

    #[tokio::test]
    async fn reupload_after_collection_stores_again() {
        let app = TestApp::spawn().await;
        let data = png(b"again");

        let first = app.upload("alice", "a.png", "image/png", data.clone()).await;
        app.delete(&routes::file(&first.id()), "alice").await;

        let second = app.upload("alice", "a.png", "image/png", data.clone()).await;
        assert_eq!(second.status, 201);
        assert_eq!(second.body["deduplicated"], false);

        let content = app.get(&routes::content(&second.id()), "alice").await;
        assert_eq!(content.bytes, data);
    }

    #[tokio::test]
    async fn cannot_delete_someone_elses_file() {
        let app = TestApp::spawn().await;
        let id = app.upload_ok("alice", "a.png", "image/png", png(b"mine")).await;

        let res = app.delete(&routes::file(&id), "mallory").await;
        assert_eq!(res.status, 404);

        let still_there = app.get(&routes::file(&id), "alice").await;
        assert_eq!(still_there.status, 200);
    }

    #[tokio::test]
    async fn deleting_twice_is_not_found() {
        let app = TestApp::spawn().await;
        let id = app.upload_ok("alice", "a.png", "image/png", png(b"twice")).await;

        assert_eq!(app.delete(&routes::file(&id), "alice").await.status, 204);
        assert_eq!(app.delete(&routes::file(&id), "alice").await.status, 404);
    }
}
