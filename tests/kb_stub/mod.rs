use std::collections::HashSet;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

static LOGO_PNG: &[u8] = &[
    137, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13, 73, 72, 68, 82, 0, 0, 0, 1, 0, 0, 0, 1, 8, 4, 0,
    0, 0, 181, 28, 12, 2, 0, 0, 0, 11, 73, 68, 65, 84, 120, 218, 99, 252, 255, 23, 0, 2, 3, 1, 128,
    110, 220, 25, 0, 0, 0, 0, 73, 69, 78, 68, 174, 66, 96, 130,
];

/// Book "Demo" served under `/team/demo`:
///
/// ```text
/// 1 Intro (TITLE)
///   2 Hello World (DOC hello)
///   3 Elsewhere (LINK)
///   4 Deep: Dive (TITLE)
///     5 Broken (DOC broken, always 500)
/// 6 Pic (DOC pic, one remote image)
/// ```
pub const BOOK_PATH: &str = "/team/demo";

pub struct KbStub {
    pub base_url: String,
    hits: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl KbStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start kb stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let hits = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_hits = Arc::clone(&hits);
        let thread_base = base_url.clone();
        let handle = thread::spawn(move || {
            let failing: HashSet<&str> = HashSet::from(["broken"]);
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                let path = url.split('?').next().unwrap_or(&url).to_owned();
                thread_hits.lock().expect("lock hits").push(path.clone());

                let (status, content_type, body) = match path.as_str() {
                    BOOK_PATH => (200, "text/html; charset=utf-8", book_page().into_bytes()),
                    "/team/empty" => (200, "text/html; charset=utf-8", b"<html></html>".to_vec()),
                    "/assets/logo.png" => (200, "image/png", LOGO_PNG.to_vec()),
                    _ => match path.strip_prefix("/api/docs/") {
                        Some(slug) if failing.contains(slug) => {
                            (500, "text/plain", b"internal error".to_vec())
                        }
                        Some(slug) => match doc_markdown(slug, &thread_base) {
                            Some(markdown) => (
                                200,
                                "application/json",
                                serde_json::json!({ "data": { "sourcecode": markdown } })
                                    .to_string()
                                    .into_bytes(),
                            ),
                            None => (404, "text/plain", b"not found".to_vec()),
                        },
                        None => (404, "text/plain", b"not found".to_vec()),
                    },
                };

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                        .expect("build header");
                let response = tiny_http::Response::from_data(body)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            hits,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn book_url(&self) -> String {
        format!("{}{BOOK_PATH}", self.base_url)
    }

    pub fn doc_hits(&self) -> usize {
        self.hits
            .lock()
            .expect("lock hits")
            .iter()
            .filter(|path| path.starts_with("/api/docs/"))
            .count()
    }
}

impl Drop for KbStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn book_page() -> String {
    let app_data = serde_json::json!({
        "book": {
            "id": 101,
            "slug": "demo",
            "name": "Demo",
            "description": "A stub knowledge base",
            "toc": [
                { "type": "TITLE", "title": "Intro", "uuid": "1", "parent_uuid": "", "child_uuid": "2", "url": "" },
                { "type": "DOC", "title": "Hello World", "uuid": "2", "parent_uuid": "1", "child_uuid": "", "url": "hello" },
                { "type": "LINK", "title": "Elsewhere", "uuid": "3", "parent_uuid": "1", "child_uuid": "", "url": "https://other.example.com/page" },
                { "type": "TITLE", "title": "Deep: Dive", "uuid": "4", "parent_uuid": "1", "child_uuid": "5", "url": "" },
                { "type": "DOC", "title": "Broken", "uuid": "5", "parent_uuid": "4", "child_uuid": "", "url": "broken" },
                { "type": "DOC", "title": "Pic", "uuid": "6", "parent_uuid": "", "child_uuid": null, "url": "pic" }
            ]
        }
    });
    format!(
        "<!doctype html>\n<html><head><title>Demo</title></head><body>\n<script>window.appData = JSON.parse(decodeURIComponent(\"{}\"));</script>\n</body></html>\n",
        urlencoding::encode(&app_data.to_string())
    )
}

fn doc_markdown(slug: &str, base_url: &str) -> Option<String> {
    match slug {
        "hello" => Some("# Hello\n<a name=\"top\"></a>\nHi<br />there\n".to_owned()),
        "pic" => Some(format!("# Pic\n\n![logo]({base_url}/assets/logo.png)\n")),
        _ => None,
    }
}
