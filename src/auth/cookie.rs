use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::HttpRequest;

use crate::config::CookieConfig;

/// Builds and reads the `HttpOnly` cookie that carries the raw refresh secret.
#[derive(Debug, Clone)]
pub struct RefreshCookie {
    name: String,
    path: String,
    secure: bool,
}

impl RefreshCookie {
    pub fn new(config: &CookieConfig) -> Self {
        Self {
            name: config.name.clone(),
            path: config.path.clone(),
            secure: config.secure,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // SameSite=None is only honored by browsers on secure cookies
    fn same_site(&self) -> SameSite {
        if self.secure {
            SameSite::None
        } else {
            SameSite::Lax
        }
    }

    pub fn issue(&self, raw_secret: &str, max_age: chrono::Duration) -> Cookie<'static> {
        Cookie::build(self.name.clone(), raw_secret.to_string())
            .path(self.path.clone())
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site())
            .max_age(time::Duration::seconds(max_age.num_seconds()))
            .finish()
    }

    pub fn clear(&self) -> Cookie<'static> {
        Cookie::build(self.name.clone(), String::new())
            .path(self.path.clone())
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site())
            .max_age(time::Duration::ZERO)
            .finish()
    }

    pub fn extract(&self, req: &HttpRequest) -> Option<String> {
        req.cookie(&self.name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
    }
}
