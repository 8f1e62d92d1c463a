use axum::{
    body::Body,
    http::{header, Response, StatusCode},
    response::IntoResponse,
};
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;
use webapi_core::hosting::HostEnvironment;

pub type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response<Body>;

/// Development shows the panic message; other environments get a bare 500.
pub fn exception_layer(environment: &HostEnvironment) -> CatchPanicLayer<PanicHandler> {
    let handler: PanicHandler = if environment.is_development() {
        developer_exception_page
    } else {
        internal_server_error
    };
    CatchPanicLayer::custom(handler)
}

fn panic_message(err: &(dyn Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    }
}

fn developer_exception_page(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = panic_message(&*err);
    error!("Unhandled panic while processing request: {}", message);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!(
            "An unhandled exception occurred while processing the request.\n\n{}\n",
            message
        ),
    )
        .into_response()
}

fn internal_server_error(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    error!(
        "Unhandled panic while processing request: {}",
        panic_message(&*err)
    );
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
