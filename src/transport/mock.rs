//! Scripted transport for tests.

use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{ApiRequest, ApiResponse, Method, Transport};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Reply {
    Response(ApiResponse),
    Unreachable(String),
}

#[derive(Debug)]
struct Route {
    method: Method,
    path: String,
    replies: VecDeque<Reply>,
}

impl Route {
    fn matches(&self, request: &ApiRequest) -> bool {
        if self.method != request.method {
            return false;
        }
        let without_query = request.url.split('?').next().unwrap_or(&request.url);
        request.url.ends_with(&self.path) || without_query.ends_with(&self.path)
    }

    /// Replies are consumed in order; the last one repeats.
    fn next_reply(&mut self) -> Option<Reply> {
        if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        }
    }
}

/// Transport that answers from scripted routes and records every request.
///
/// A route matches when the method is equal and the request URL (with or
/// without its query string) ends with the route path. The longest matching
/// path wins.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method path`.
    pub fn on(&self, method: Method, path: impl Into<String>, response: ApiResponse) -> &Self {
        self.push(method, path.into(), Reply::Response(response));
        self
    }

    /// Queue a 200 JSON response.
    pub fn on_json(&self, method: Method, path: impl Into<String>, body: serde_json::Value) -> &Self {
        self.on(method, path, ApiResponse::ok_json(body))
    }

    /// Queue a transport failure.
    pub fn on_unreachable(&self, method: Method, path: impl Into<String>) -> &Self {
        let path = path.into();
        let message = format!("connection refused: {}", path);
        self.push(method, path, Reply::Unreachable(message));
        self
    }

    fn push(&self, method: Method, path: String, reply: Reply) {
        let mut routes = self.routes.lock();
        match routes.iter_mut().find(|r| r.method == method && r.path == path) {
            Some(route) => route.replies.push_back(reply),
            None => routes.push(Route {
                method,
                path,
                replies: VecDeque::from([reply]),
            }),
        }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// Requests other than GET.
    pub fn mutating_requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method != Method::Get)
            .cloned()
            .collect()
    }

    /// Requests whose URL contains `fragment`.
    pub fn requests_to(&self, fragment: &str) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.requests.lock().push(request.clone());
        let mut routes = self.routes.lock();
        let reply = routes
            .iter_mut()
            .filter(|r| r.matches(request))
            .max_by_key(|r| r.path.len())
            .and_then(Route::next_reply);
        match reply {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Unreachable(message)) => Err(Error::connection(message)),
            None => Err(Error::connection(format!(
                "no scripted response for {} {}",
                request.method, request.url
            ))),
        }
    }
}
