pub const RECIPE_COUNT_PER_PAGE: i64 = 6;
pub const SUBSCRIPTION_COUNT_PER_PAGE: i64 = 6;

pub const SESSION_COOKIE: &str = "session";
pub const SESSION_SECRET_ENV: &str = "SESSION_SECRET";

pub const IMAGE_DATA_URI_PREFIX: &str = "data:image/";
pub const IMAGE_UPLOAD_DIR: &str = "recipes";
