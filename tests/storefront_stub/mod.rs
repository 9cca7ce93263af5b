use std::collections::HashMap;
use std::io::Read as _;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

#[allow(dead_code)]
impl Route {
    pub fn html(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.into(),
        }
    }

    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: format!("stub status {status}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub url: String,
    pub body: String,
}

/// Serves fixed routes keyed by path (query ignored) and records every request.
///
/// Stands in for pass-through proxies, storefronts and webhook receivers.
pub struct StorefrontStub {
    pub base_url: String,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl StorefrontStub {
    pub fn spawn(routes: Vec<(&str, Route)>) -> Self {
        let routes: HashMap<String, Route> = routes
            .into_iter()
            .map(|(path, route)| (path.to_owned(), route))
            .collect();
        let routes = Arc::new(Mutex::new(routes));
        let served = Arc::clone(&routes);

        let server = tiny_http::Server::http("127.0.0.1:0").expect("start storefront stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                let path = url.split('?').next().unwrap_or(&url).to_owned();
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);

                recorded
                    .lock()
                    .expect("lock recorded requests")
                    .push(RecordedRequest {
                        method: request.method().to_string(),
                        path: path.clone(),
                        url: url.clone(),
                        body,
                    });

                let route = served
                    .lock()
                    .expect("lock stub routes")
                    .get(&path)
                    .cloned()
                    .unwrap_or_else(|| Route::status(404));
                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], route.content_type.as_bytes())
                        .expect("build header");
                let response = tiny_http::Response::from_string(route.body)
                    .with_status_code(route.status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            routes,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Replaces the response for `path`; later requests see the new route.
    pub fn set_route(&self, path: &str, route: Route) {
        self.routes
            .lock()
            .expect("lock stub routes")
            .insert(path.to_owned(), route);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("lock recorded requests").clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

impl Drop for StorefrontStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[allow(dead_code)]
pub const IN_STOCK_PAGE: &str = r#"<!doctype html>
<html><head>
<meta property="og:title" content="Air Classic">
<meta property="og:image" content="//cdn.shop.example/air.jpg">
<title>Air Classic | Shop</title>
</head><body>
<button>Add to cart</button>
<script>var inventory = {"variants":[{"available": true}], "price_min": 11900};</script>
</body></html>"#;

#[allow(dead_code)]
pub const PRODUCT_JSON: &str = r#"{"product":{"id":7001,"title":"Air Classic","handle":"air-classic",
"variants":[
  {"id":41,"title":"41","price":"119.00","available":true,"option1":"41"},
  {"id":42,"title":"42","price":"119.00","available":true,"option1":"42"},
  {"id":43,"title":"43","price":"119.00","available":false,"option1":"43"}
]}}"#;
