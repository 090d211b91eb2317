use axum::Json;
use axum_extra::extract::CookieJar;

use crate::preferences::{PreferenceCookies, PreferenceUpdate, Preferences};

pub async fn get(jar: CookieJar) -> Json<Preferences> {
    Json(PreferenceCookies::read(&jar))
}

pub async fn update(jar: CookieJar, Json(update): Json<PreferenceUpdate>) -> (CookieJar, Json<Preferences>) {
    let (jar, preferences) = PreferenceCookies::write(jar, update);
    (jar, Json(preferences))
}
