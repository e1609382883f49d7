use std::path::{Path, PathBuf};

use davshare::{DavHandler, body::Body};
use http::{Request, Response, StatusCode};

struct TestServer {
    handler: DavHandler,
    #[allow(dead_code)]
    dir: tempfile::TempDir,
    root: PathBuf,
}

fn setup(locking: bool) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("share");
    std::fs::create_dir(&root).unwrap();

    let mut builder = DavHandler::builder().root_dir(&root);
    if locking {
        // the lock table lives outside the served tree
        builder = builder.lock_db(dir.path().join("locks.db"));
    }
    TestServer {
        handler: builder.build_handler(),
        dir,
        root,
    }
}

fn request(method: &str, uri: &str) -> http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost")
}

async fn resp_to_string(mut resp: Response<Body>) -> String {
    use futures_util::StreamExt;

    let mut data = Vec::new();
    let body = resp.body_mut();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => data.extend_from_slice(&bytes),
            Err(e) => panic!("Error reading body stream: {}", e),
        }
    }
    String::from_utf8(data).unwrap_or_else(|_| "".to_string())
}

// Acquire a lock, panicking unless it is granted; returns the token.
async fn lock(server: &DavHandler, uri: &str, scope: &str, depth: &str) -> String {
    let body = format!(
        "<D:lockinfo xmlns:D=\"DAV:\"><D:lockscope><D:{}/></D:lockscope>\
         <D:locktype><D:write/></D:locktype><D:owner>test</D:owner></D:lockinfo>",
        scope
    );
    let req = request("LOCK", uri)
        .header("depth", depth)
        .body(Body::from(body))
        .unwrap();
    let resp = server.handle(req).await;
    assert!(
        resp.status() == StatusCode::OK || resp.status() == StatusCode::CREATED,
        "LOCK {} failed: {}",
        uri,
        resp.status()
    );
    let token = resp.headers().get("lock-token").unwrap().to_str().unwrap();
    token.trim_matches(|c| c == '<' || c == '>').to_string()
}

fn write_file(root: &Path, rel: &str, content: &[u8]) {
    std::fs::write(root.join(rel), content).unwrap();
}

#[tokio::test]
async fn options_advertises_lock_class() {
    let srv = setup(true);
    let resp = srv
        .handler
        .handle(request("OPTIONS", "/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("DAV").unwrap(), "1,2");

    let srv = setup(false);
    let resp = srv
        .handler
        .handle(request("OPTIONS", "/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.headers().get("DAV").unwrap(), "1");
}

#[tokio::test]
async fn put_then_get_roundtrip() {
    let srv = setup(false);

    let resp = srv
        .handler
        .handle(request("PUT", "/a.txt").body(Body::from("hello world")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = srv
        .handler
        .handle(request("GET", "/a.txt").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("etag"));
    assert!(resp.headers().contains_key("last-modified"));
    assert_eq!(resp.headers().get("content-type").unwrap(), "text/plain");
    assert_eq!(resp_to_string(resp).await, "hello world");

    // overwriting an existing file reports 204
    let resp = srv
        .handler
        .handle(request("PUT", "/a.txt").body(Body::from("other")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = srv
        .handler
        .handle(request("GET", "/absent").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_on_collection_is_rejected() {
    let srv = setup(false);
    std::fs::create_dir(srv.root.join("d")).unwrap();
    let resp = srv
        .handler
        .handle(request("PUT", "/d").body(Body::from("x")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn exclusive_lock_blocks_others() {
    let srv = setup(true);
    write_file(&srv.root, "a.txt", b"content");

    let token = lock(&srv.handler, "/a.txt", "exclusive", "0").await;
    assert!(token.starts_with("urn:uuid:"));

    // without the token the write is refused
    let resp = srv
        .handler
        .handle(request("PUT", "/a.txt").body(Body::from("no")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    // with the token it goes through
    let resp = srv
        .handler
        .handle(
            request("PUT", "/a.txt")
                .header("if", format!("(<{}>)", token))
                .body(Body::from("yes"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(std::fs::read(srv.root.join("a.txt")).unwrap(), b"yes");
}

#[tokio::test]
async fn infinite_depth_lock_covers_descendants() {
    let srv = setup(true);
    std::fs::create_dir_all(srv.root.join("dir/sub")).unwrap();
    write_file(&srv.root, "dir/sub/file", b"x");

    let token = lock(&srv.handler, "/dir", "shared", "infinity").await;

    let resp = srv
        .handler
        .handle(request("DELETE", "/dir/sub/file").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    let resp = srv
        .handler
        .handle(
            request("DELETE", "/dir/sub/file")
                .header("if", format!("</dir> (<{}>)", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(!srv.root.join("dir/sub/file").exists());
}

#[tokio::test]
async fn root_lock_blocks_all_descendants() {
    let srv = setup(true);
    let token = lock(&srv.handler, "/", "exclusive", "infinity").await;

    let resp = srv
        .handler
        .handle(request("PUT", "/sub.txt").body(Body::from("x")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    let resp = srv
        .handler
        .handle(
            request("PUT", "/sub.txt")
                .header("if", format!("(<{}>)", token))
                .body(Body::from("x"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn shared_then_exclusive_conflicts() {
    let srv = setup(true);
    write_file(&srv.root, "f", b"x");

    let _shared = lock(&srv.handler, "/f", "shared", "0").await;

    let body = "<D:lockinfo xmlns:D=\"DAV:\"><D:lockscope><D:exclusive/></D:lockscope>\
                <D:locktype><D:write/></D:locktype></D:lockinfo>";
    let resp = srv
        .handler
        .handle(request("LOCK", "/f").body(Body::from(body)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);
}

#[tokio::test]
async fn lock_null_resource_is_created() {
    let srv = setup(true);
    let body = "<D:lockinfo xmlns:D=\"DAV:\"><D:lockscope><D:exclusive/></D:lockscope>\
                <D:locktype><D:write/></D:locktype></D:lockinfo>";
    let resp = srv
        .handler
        .handle(request("LOCK", "/newfile").body(Body::from(body)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(srv.root.join("newfile").exists());
    assert_eq!(std::fs::read(srv.root.join("newfile")).unwrap(), b"");
}

#[tokio::test]
async fn unlock_removes_unmodified_placeholder() {
    let srv = setup(true);

    // LOCK on a nonexistent path materializes an empty placeholder
    let token = lock(&srv.handler, "/draft", "exclusive", "0").await;
    assert!(srv.root.join("draft").exists());

    let resp = srv
        .handler
        .handle(
            request("UNLOCK", "/draft")
                .header("lock-token", format!("<{}>", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    // the untouched placeholder went away with its lock
    assert!(!srv.root.join("draft").exists());
}

#[tokio::test]
async fn unlock_keeps_modified_placeholder() {
    let srv = setup(true);

    let token = lock(&srv.handler, "/draft", "exclusive", "0").await;

    // write through the lock, the resource is a real file now
    let resp = srv
        .handler
        .handle(
            request("PUT", "/draft")
                .header("if", format!("(<{}>)", token))
                .body(Body::from("data"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = srv
        .handler
        .handle(
            request("UNLOCK", "/draft")
                .header("lock-token", format!("<{}>", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(std::fs::read(srv.root.join("draft")).unwrap(), b"data");
}

#[tokio::test]
async fn unlock_releases_cleanly() {
    let srv = setup(true);
    write_file(&srv.root, "f", b"x");

    let token = lock(&srv.handler, "/f", "exclusive", "0").await;

    // a wrong token is a conflict
    let resp = srv
        .handler
        .handle(
            request("UNLOCK", "/f")
                .header("lock-token", "<urn:uuid:00000000-0000-0000-0000-000000000000>")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = srv
        .handler
        .handle(
            request("UNLOCK", "/f")
                .header("lock-token", format!("<{}>", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    // the file predates the lock, so it stays
    assert!(srv.root.join("f").exists());

    // a subsequent exclusive lock succeeds
    let token2 = lock(&srv.handler, "/f", "exclusive", "0").await;
    assert_ne!(token, token2);
}

#[tokio::test]
async fn lock_refresh_with_empty_body() {
    let srv = setup(true);
    write_file(&srv.root, "f", b"x");

    let token = lock(&srv.handler, "/f", "exclusive", "0").await;
    let resp = srv
        .handler
        .handle(
            request("LOCK", "/f")
                .header("if", format!("(<{}>)", token))
                .header("timeout", "Second-600")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let text = resp_to_string(resp).await;
    assert!(text.contains(&token));
    assert!(text.contains("D:activelock"));

    // a refresh without any token is malformed
    let resp = srv
        .handler
        .handle(request("LOCK", "/f").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn expired_lock_stops_authorizing() {
    let srv = setup(true);
    write_file(&srv.root, "f", b"x");

    let body = "<D:lockinfo xmlns:D=\"DAV:\"><D:lockscope><D:exclusive/></D:lockscope>\
                <D:locktype><D:write/></D:locktype></D:lockinfo>";
    let resp = srv
        .handler
        .handle(
            request("LOCK", "/f")
                .header("timeout", "Second-1")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = resp.headers().get("lock-token").unwrap().to_str().unwrap();
    let token = token.trim_matches(|c| c == '<' || c == '>').to_string();

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    // the stale token no longer satisfies the If: precondition
    let resp = srv
        .handler
        .handle(
            request("PUT", "/f")
                .header("if", format!("(<{}>)", token))
                .body(Body::from("x"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    // and the expired lock no longer blocks anyone
    let resp = srv
        .handler
        .handle(request("PUT", "/f").body(Body::from("y")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn propfind_depth_one_lists_members() {
    let srv = setup(false);
    std::fs::create_dir(srv.root.join("x")).unwrap();
    write_file(&srv.root, "x/f1", b"aaaa");
    write_file(&srv.root, "x/f2", b"bb");

    let body = "<D:propfind xmlns:D=\"DAV:\"><D:prop><D:getcontentlength/></D:prop></D:propfind>";
    let resp = srv
        .handler
        .handle(
            request("PROPFIND", "/x")
                .header("depth", "1")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("http://localhost/x/</D:href>"));
    assert!(text.contains("http://localhost/x/f1"));
    assert!(text.contains("http://localhost/x/f2"));
    assert!(text.contains("<D:getcontentlength>4</D:getcontentlength>"));
    assert!(text.contains("<D:getcontentlength>2</D:getcontentlength>"));
    // collections have no getcontentlength
    assert!(text.contains("404"));
}

#[tokio::test]
async fn propfind_depth_zero_single_response() {
    let srv = setup(false);
    std::fs::create_dir(srv.root.join("x")).unwrap();
    write_file(&srv.root, "x/f1", b"a");

    let resp = srv
        .handler
        .handle(
            request("PROPFIND", "/x")
                .header("depth", "0")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert_eq!(text.matches("<D:response>").count(), 1);
}

#[tokio::test]
async fn propfind_infinity_recurses() {
    let srv = setup(false);
    std::fs::create_dir_all(srv.root.join("a/b/c")).unwrap();
    write_file(&srv.root, "a/b/c/deep.txt", b"x");

    let resp = srv
        .handler
        .handle(request("PROPFIND", "/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("a/b/c/deep.txt"));
}

#[tokio::test]
async fn propfind_propname_lists_names_without_values() {
    let srv = setup(true);
    write_file(&srv.root, "f", b"x");

    let body = "<D:propfind xmlns:D=\"DAV:\"><D:propname/></D:propfind>";
    let resp = srv
        .handler
        .handle(
            request("PROPFIND", "/f")
                .header("depth", "0")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:getetag></D:getetag>") || text.contains("<D:getetag/>"));
    assert!(text.contains("supportedlock"));
}

#[tokio::test]
async fn propfind_unknown_depth_is_bad_request() {
    let srv = setup(false);
    let resp = srv
        .handler
        .handle(
            request("PROPFIND", "/")
                .header("depth", "2")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn proppatch_is_all_or_nothing() {
    let srv = setup(false);
    write_file(&srv.root, "f", b"x");
    let before = std::fs::metadata(srv.root.join("f"))
        .unwrap()
        .modified()
        .unwrap();

    let body = r#"<D:propertyupdate xmlns:D="DAV:">
        <D:set><D:prop><D:getlastmodified>Wed, 21 Oct 2015 07:28:00 GMT</D:getlastmodified></D:prop></D:set>
        <D:set><D:prop><D:resourcetype>x</D:resourcetype></D:prop></D:set>
    </D:propertyupdate>"#;
    let resp = srv
        .handler
        .handle(request("PROPPATCH", "/f").body(Body::from(body)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("424 Failed Dependency"));
    assert!(text.contains("403 Forbidden"));
    assert!(text.contains("cannot-modify-protected-property"));

    // neither instruction was applied
    let after = std::fs::metadata(srv.root.join("f"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn proppatch_sets_lastmodified() {
    let srv = setup(false);
    write_file(&srv.root, "f", b"x");

    let body = r#"<D:propertyupdate xmlns:D="DAV:">
        <D:set><D:prop><D:getlastmodified>Wed, 21 Oct 2015 07:28:00 GMT</D:getlastmodified></D:prop></D:set>
    </D:propertyupdate>"#;
    let resp = srv
        .handler
        .handle(request("PROPPATCH", "/f").body(Body::from(body)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("200 OK"));

    let resp = srv
        .handler
        .handle(request("GET", "/f").body(Body::empty()).unwrap())
        .await;
    assert_eq!(
        resp.headers().get("last-modified").unwrap(),
        "Wed, 21 Oct 2015 07:28:00 GMT"
    );
}

#[tokio::test]
async fn proppatch_remove_is_forbidden() {
    let srv = setup(false);
    write_file(&srv.root, "f", b"x");

    let body = r#"<D:propertyupdate xmlns:D="DAV:">
        <D:remove><D:prop><D:getlastmodified/></D:prop></D:remove>
    </D:propertyupdate>"#;
    let resp = srv
        .handler
        .handle(request("PROPPATCH", "/f").body(Body::from(body)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("403 Forbidden"));
}

#[tokio::test]
async fn mkcol_status_codes() {
    let srv = setup(false);

    let resp = srv
        .handler
        .handle(request("MKCOL", "/newdir").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(srv.root.join("newdir").is_dir());

    // already exists
    let resp = srv
        .handler
        .handle(request("MKCOL", "/newdir").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    // parent missing
    let resp = srv
        .handler
        .handle(request("MKCOL", "/no/such").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // a body on MKCOL is not acceptable
    let resp = srv
        .handler
        .handle(request("MKCOL", "/other").body(Body::from("x")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn delete_removes_tree_and_locks() {
    let srv = setup(true);
    std::fs::create_dir_all(srv.root.join("d/sub")).unwrap();
    write_file(&srv.root, "d/sub/f", b"x");

    let token = lock(&srv.handler, "/d/sub/f", "exclusive", "0").await;

    // the lock sits on a member, so the If: list has to name it
    let resp = srv
        .handler
        .handle(
            request("DELETE", "/d")
                .header("if", format!("</d/sub/f> (<{}>)", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(!srv.root.join("d").exists());

    // DELETE leaves no residual locks: the recreated path is writable
    // without any token
    std::fs::create_dir_all(srv.root.join("d/sub")).unwrap();
    let resp = srv
        .handler
        .handle(request("PUT", "/d/sub/f").body(Body::from("fresh")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = srv
        .handler
        .handle(request("DELETE", "/missing").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn move_honors_overwrite() {
    let srv = setup(true);
    write_file(&srv.root, "a", b"content-a");
    write_file(&srv.root, "b", b"content-b");

    let token = lock(&srv.handler, "/a", "exclusive", "0").await;

    let resp = srv
        .handler
        .handle(
            request("MOVE", "/a")
                .header("destination", "http://localhost/b")
                .header("overwrite", "F")
                .header("if", format!("(<{}>)", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    let resp = srv
        .handler
        .handle(
            request("MOVE", "/a")
                .header("destination", "http://localhost/b")
                .header("overwrite", "T")
                .header("if", format!("(<{}>)", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(!srv.root.join("a").exists());
    assert_eq!(std::fs::read(srv.root.join("b")).unwrap(), b"content-a");

    // the lock scoped at the source was released with the move
    let resp = srv
        .handler
        .handle(request("PUT", "/a").body(Body::from("fresh")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn move_to_new_name_reports_created() {
    let srv = setup(false);
    write_file(&srv.root, "a", b"data");

    let resp = srv
        .handler
        .handle(
            request("MOVE", "/a")
                .header("destination", "http://localhost/b")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(!srv.root.join("a").exists());
    assert_eq!(std::fs::read(srv.root.join("b")).unwrap(), b"data");
}

#[tokio::test]
async fn copy_preserves_content_and_etag() {
    let srv = setup(false);
    write_file(&srv.root, "a", b"data");

    let resp = srv
        .handler
        .handle(request("GET", "/a").body(Body::empty()).unwrap())
        .await;
    let etag_a = resp.headers().get("etag").unwrap().clone();

    let resp = srv
        .handler
        .handle(
            request("COPY", "/a")
                .header("destination", "http://localhost/c")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(std::fs::read(srv.root.join("a")).unwrap(), b"data");

    let resp = srv
        .handler
        .handle(request("GET", "/c").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp_to_string(resp).await, "data");

    // metadata is carried over, so the copy is the "same revision"
    let resp = srv
        .handler
        .handle(request("GET", "/c").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.headers().get("etag").unwrap(), &etag_a);
}

#[tokio::test]
async fn copy_directory_depth_zero_and_infinity() {
    let srv = setup(false);
    std::fs::create_dir(srv.root.join("src")).unwrap();
    write_file(&srv.root, "src/f", b"x");

    // depth 0 copies the collection itself, not the contents
    let resp = srv
        .handler
        .handle(
            request("COPY", "/src")
                .header("destination", "http://localhost/shallow")
                .header("depth", "0")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(srv.root.join("shallow").is_dir());
    assert!(!srv.root.join("shallow/f").exists());

    let resp = srv
        .handler
        .handle(
            request("COPY", "/src")
                .header("destination", "http://localhost/deep")
                .header("depth", "infinity")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(std::fs::read(srv.root.join("deep/f")).unwrap(), b"x");
}

#[tokio::test]
async fn destination_outside_root_is_bad_gateway() {
    let srv = setup(false);
    write_file(&srv.root, "a", b"x");

    let resp = srv
        .handler
        .handle(
            request("MOVE", "/a")
                .header("destination", "http://elsewhere.example/b")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    // a destination that does not even parse is a malformed header
    let resp = srv
        .handler
        .handle(
            request("MOVE", "/a")
                .header("destination", "http://[bad")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn if_none_match_star_on_existing_fails() {
    let srv = setup(false);
    write_file(&srv.root, "a", b"x");

    let resp = srv
        .handler
        .handle(
            request("PUT", "/a")
                .header("if-none-match", "*")
                .body(Body::from("y"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    // and If-Match: * against a missing target fails too
    let resp = srv
        .handler
        .handle(
            request("PUT", "/missing")
                .header("if-match", "*")
                .body(Body::from("y"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    // both headers at once conflict
    let resp = srv
        .handler
        .handle(
            request("PUT", "/a")
                .header("if-match", "*")
                .header("if-none-match", "*")
                .body(Body::from("y"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn if_match_current_etag_allows_update() {
    let srv = setup(false);
    write_file(&srv.root, "a", b"x");

    let resp = srv
        .handler
        .handle(request("GET", "/a").body(Body::empty()).unwrap())
        .await;
    let etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();

    let resp = srv
        .handler
        .handle(
            request("PUT", "/a")
                .header("if-match", &etag)
                .body(Body::from("y"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // the old etag no longer matches
    let resp = srv
        .handler
        .handle(
            request("PUT", "/a")
                .header("if-match", &etag)
                .body(Body::from("z"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn lock_and_unlock_disabled_without_backend() {
    let srv = setup(false);
    write_file(&srv.root, "f", b"x");

    let body = "<D:lockinfo xmlns:D=\"DAV:\"><D:lockscope><D:exclusive/></D:lockscope>\
                <D:locktype><D:write/></D:locktype></D:lockinfo>";
    let resp = srv
        .handler
        .handle(request("LOCK", "/f").body(Body::from(body)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn unknown_method_not_implemented() {
    let srv = setup(false);
    let resp = srv
        .handler
        .handle(request("POST", "/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn get_on_collection_serves_index() {
    let srv = setup(false);
    write_file(&srv.root, "visible.txt", b"x");

    let resp = srv
        .handler
        .handle(request("GET", "/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/html; charset=utf-8"
    );
    let text = resp_to_string(resp).await;
    assert!(text.contains("visible.txt"));
}

#[tokio::test]
async fn restricted_paths_are_forbidden_and_unlisted() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("share");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(root.join("x.secret"), b"hidden").unwrap();
    std::fs::write(root.join("plain.txt"), b"ok").unwrap();

    let handler = DavHandler::builder()
        .root_dir(&root)
        .restrict_access("*.secret")
        .build_handler();

    let resp = handler
        .handle(request("GET", "/x.secret").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = handler
        .handle(
            request("PROPFIND", "/")
                .header("depth", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(!text.contains("x.secret"));
    assert!(text.contains("plain.txt"));
}

#[tokio::test]
async fn write_restriction_keeps_reads_working() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("share");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(root.join("readonly.cfg"), b"v=1").unwrap();

    let handler = DavHandler::builder()
        .root_dir(&root)
        .restrict_write("*.cfg")
        .build_handler();

    let resp = handler
        .handle(request("GET", "/readonly.cfg").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = handler
        .handle(request("PUT", "/readonly.cfg").body(Body::from("v=2")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn body_on_bodyless_method_rejected() {
    let srv = setup(false);
    write_file(&srv.root, "f", b"x");

    for method in ["DELETE", "COPY", "MOVE", "OPTIONS", "UNLOCK"] {
        let resp = srv
            .handler
            .handle(
                request(method, "/f")
                    .header("destination", "http://localhost/g")
                    .body(Body::from("stray body"))
                    .unwrap(),
            )
            .await;
        assert_eq!(
            resp.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "method {}",
            method
        );
    }
}

#[tokio::test]
async fn path_escape_attempts_are_contained() {
    let srv = setup(false);
    let resp = srv
        .handler
        .handle(request("GET", "/../../etc/passwd").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}
