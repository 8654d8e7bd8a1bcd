use axum::response::Redirect;

pub async fn app() -> Redirect {
    Redirect::to("/chat")
}
