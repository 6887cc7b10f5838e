//! Method dispatch table.
//!
//! Handlers are registered with their parameter and result types; the
//! router owns the JSON conversion on both sides so handlers only see
//! typed values.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use vfs_bridge_rpc::ResponseError;

use crate::protocol::{
    RemoveParams, RenameParams, UriParams, WatchParams, WriteFileParams, methods,
};
use crate::session::SessionContext;

/// Pending outcome of a dispatched request.
pub type HandlerFuture = BoxFuture<'static, Result<Value, ResponseError>>;

type Handler = Arc<dyn Fn(Arc<SessionContext>, Value) -> HandlerFuture + Send + Sync>;

/// Maps method names to handlers.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<&'static str, Handler>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.methods())
            .finish()
    }
}

impl Router {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The full `vfs/*` method table.
    #[must_use]
    pub fn vfs() -> Self {
        let mut router = Self::new();
        router
            .route(methods::READ_FILE, |cx: Arc<SessionContext>, p: UriParams| async move {
                cx.facade().read_file(&p.uri).await
            })
            .route(methods::EXISTS, |cx: Arc<SessionContext>, p: UriParams| async move {
                cx.facade().exists(&p.uri).await
            })
            .route(methods::LAST_MODIFIED, |cx: Arc<SessionContext>, p: UriParams| async move {
                cx.facade().last_modified(&p.uri).await
            })
            .route(methods::CREATED, |cx: Arc<SessionContext>, p: UriParams| async move {
                cx.facade().created(&p.uri).await
            })
            .route(methods::IS_DIRECTORY, |cx: Arc<SessionContext>, p: UriParams| async move {
                cx.facade().is_directory(&p.uri).await
            })
            .route(methods::IS_FILE, |cx: Arc<SessionContext>, p: UriParams| async move {
                cx.facade().is_file(&p.uri).await
            })
            .route(methods::LIST, |cx: Arc<SessionContext>, p: UriParams| async move {
                cx.facade().list(&p.uri).await
            })
            .route(methods::WRITE_FILE, |cx: Arc<SessionContext>, p: WriteFileParams| async move {
                cx.facade().write_file(&p).await
            })
            .route(methods::MK_DIRECTORY, |cx: Arc<SessionContext>, p: UriParams| async move {
                cx.facade().mk_directory(&p.uri).await
            })
            .route(methods::REMOVE, |cx: Arc<SessionContext>, p: RemoveParams| async move {
                cx.facade().remove(&p.uri, p.recursive).await
            })
            .route(methods::RENAME, |cx: Arc<SessionContext>, p: RenameParams| async move {
                cx.facade().rename(&p.from, &p.to, p.overwrite).await
            })
            .route(methods::WATCH, |cx: Arc<SessionContext>, p: WatchParams| async move {
                cx.watch(&p).await
            })
            .route(methods::UNWATCH, |cx: Arc<SessionContext>, p: WatchParams| async move {
                cx.unwatch(&p).await
            });
        router
    }

    /// Register `handler` for `method`, replacing any previous handler.
    ///
    /// Parameters that do not deserialize into `P` are answered with
    /// `-32602`; a result that does not serialize with `-32603`.
    pub fn route<P, R, F, Fut>(&mut self, method: &'static str, handler: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize,
        F: Fn(Arc<SessionContext>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |cx, params| {
            let params: P = match serde_json::from_value(params) {
                Ok(params) => params,
                Err(e) => {
                    return future::ready(Err(ResponseError::invalid_params(format!(
                        "{method}: {e}"
                    ))))
                    .boxed();
                }
            };
            let pending = handler(cx, params);
            async move {
                let result = pending.await;
                serde_json::to_value(result).map_err(|e| ResponseError::internal_error(e.to_string()))
            }
            .boxed()
        });
        self.handlers.insert(method, handler);
        self
    }

    /// Start handling `method`.
    ///
    /// The returned future owns everything it needs, so the caller may
    /// spawn it.
    pub fn dispatch(&self, cx: Arc<SessionContext>, method: &str, params: Value) -> HandlerFuture {
        match self.handlers.get(method) {
            Some(handler) => handler(cx, params),
            None => future::ready(Err(ResponseError::method_not_found(method))).boxed(),
        }
    }

    /// Whether `method` has a handler.
    #[must_use]
    pub fn handles(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<&'static str> {
        let mut methods: Vec<_> = self.handlers.keys().copied().collect();
        methods.sort_unstable();
        methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::FileSystemFacade;
    use crate::guard::SchemeGuard;
    use crate::host::MemoryFileSystem;
    use crate::protocol::ErrorCodeMode;
    use serde_json::json;

    fn context() -> Arc<SessionContext> {
        let facade = FileSystemFacade::new(
            Arc::new(MemoryFileSystem::new()),
            Arc::new(SchemeGuard::new()),
            ErrorCodeMode::Compact,
        );
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(SessionContext::new(1, Arc::new(facade), tx))
    }

    #[test]
    fn vfs_table_is_complete() {
        assert_eq!(
            Router::vfs().methods(),
            vec![
                "vfs/input/created",
                "vfs/input/exists",
                "vfs/input/isDirectory",
                "vfs/input/isFile",
                "vfs/input/lastModified",
                "vfs/input/list",
                "vfs/input/readFile",
                "vfs/output/mkDirectory",
                "vfs/output/remove",
                "vfs/output/rename",
                "vfs/output/writeFile",
                "vfs/watcher/unwatch",
                "vfs/watcher/watch",
            ]
        );
        assert!(!Router::vfs().handles(methods::EMIT_WATCH));
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let err = Router::new()
            .dispatch(context(), "vfs/input/teleport", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code, ResponseError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_params_are_reported() {
        let err = Router::vfs()
            .dispatch(context(), methods::READ_FILE, json!({"path": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ResponseError::INVALID_PARAMS);
        assert!(err.message.starts_with("vfs/input/readFile"));
    }

    #[tokio::test]
    async fn custom_routes_are_typed() {
        let mut router = Router::new();
        router.route("test/echo", |_cx: Arc<SessionContext>, n: u32| async move { n * 2 });

        let value = router.dispatch(context(), "test/echo", json!(21)).await.unwrap();
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn vfs_handlers_return_envelopes() {
        let value = Router::vfs()
            .dispatch(context(), methods::LIST, json!({"uri": "mem:///"}))
            .await
            .unwrap();
        assert_eq!(
            value,
            json!({"errorCode": 0, "entries": [], "areDirectory": []})
        );
    }
}
