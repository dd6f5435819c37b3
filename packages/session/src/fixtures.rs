//! Canned replies used in test mode.

use tapi::HttpMethod;

pub const TOKEN: &str = include_str!("../fixtures/token.json");
pub const ENDPOINTS: &str = include_str!("../fixtures/endpoints.json");
pub const SWAGGER_INDEX: &str = include_str!("../fixtures/swagger.html");
pub const SWAGGER_DOCUMENT: &str = include_str!("../fixtures/swagger.json");

const GET_ALL: &str = include_str!("../fixtures/getall.json");
const GET_ONE: &str = include_str!("../fixtures/get.json");
const POST_ALL: &str = include_str!("../fixtures/postall.json");
const POST_ONE: &str = include_str!("../fixtures/post.json");
const PUT: &str = include_str!("../fixtures/put.json");
const DELETE: &str = include_str!("../fixtures/delete.json");

/// Reply to a general request. `collection` picks the multi-record variant
/// for GET and POST.
pub fn general(method: HttpMethod, collection: bool) -> &'static str {
    match (method, collection) {
        (HttpMethod::Get, true) => GET_ALL,
        (HttpMethod::Get, false) => GET_ONE,
        (HttpMethod::Post, true) => POST_ALL,
        (HttpMethod::Post, false) => POST_ONE,
        (HttpMethod::Put, _) => PUT,
        (HttpMethod::Delete, _) => DELETE,
    }
}
