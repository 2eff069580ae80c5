use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::{options, Response};

use super::ApiContext;

/// Request guard proving the caller presented the configured bearer
/// token. Every data route takes one.
pub struct BearerToken;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerToken {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let expected = match request.rocket().state::<ApiContext>() {
            Some(ctx) => ctx.settings.app_token.as_str(),
            None => return Outcome::Error((Status::InternalServerError, ())),
        };
        let provided = request
            .headers()
            .get_one("Authorization")
            .and_then(|header| header.strip_prefix("Bearer "));
        match provided {
            Some(token) if token == expected => Outcome::Success(BearerToken),
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

/// Adds the allow-origin headers for the configured web app.
pub struct Cors {
    allow_origin: Option<String>,
}

impl Cors {
    pub fn new(allow_origin: Option<String>) -> Self {
        Cors { allow_origin }
    }
}

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        if let Some(origin) = &self.allow_origin {
            response.set_header(Header::new("Access-Control-Allow-Origin", origin.clone()));
            response.set_header(Header::new(
                "Access-Control-Allow-Methods",
                "GET, POST, OPTIONS",
            ));
            response.set_header(Header::new(
                "Access-Control-Allow-Headers",
                "Authorization, Content-Type",
            ));
        }
    }
}

/// Preflight requests carry no bearer token; answer them all.
#[options("/<_..>")]
pub fn cors_preflight() {}
