use std::sync::Arc;

use serde_json::{json, Value as JsonValue};

use crate::client::transport::SenderResponse;
use crate::client::{Client, ClientConfig};
use crate::collection::{Collection, FunctionRegistry, JsonProgramParser};
use crate::test_support::sender::{ok_response, MockSender};

pub fn collection_for_client(id: &str, client: Client) -> Collection {
    Collection::new(
        id,
        client,
        Arc::new(JsonProgramParser),
        Arc::new(FunctionRegistry::new()),
    )
}

pub fn collection_with(id: &str, sender: Arc<MockSender>, config: ClientConfig) -> Collection {
    collection_for_client(id, Client::new(sender, None, config))
}

pub fn collection_with_functions(
    id: &str,
    sender: Arc<MockSender>,
    config: ClientConfig,
    functions: Arc<FunctionRegistry>,
) -> Collection {
    Collection::new(
        id,
        Client::new(sender, None, config),
        Arc::new(JsonProgramParser),
        functions,
    )
}

/// `$collections` record whose schema source is the JSON encoded `program`.
pub fn meta_response(collection_id: &str, program: JsonValue) -> SenderResponse {
    ok_response(json!({
        "block": { "hash": "0x0" },
        "data": { "id": collection_id, "code": program.to_string() }
    }))
}

/// Schema declaring a `users` collection with a `rename(user, newName)` function.
pub fn users_program() -> JsonValue {
    json!({
        "nodes": [{
            "Collection": {
                "name": "users",
                "items": [
                    { "Field": { "name": "id", "type_": "String" } },
                    { "Field": { "name": "name", "type_": "String" } },
                    {
                        "Function": {
                            "name": "rename",
                            "parameters": [
                                { "name": "user", "type_": "Record" },
                                { "name": "newName", "type_": "String" }
                            ]
                        }
                    }
                ]
            }
        }]
    })
}
