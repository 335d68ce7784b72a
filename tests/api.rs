mod common;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;

use common::{start_app, start_fake_omdb, test_config, FakeOmdb};

struct TestApp {
    _tmp: TempDir,
    base: String,
    http: Client,
    fake: FakeOmdb,
}

impl TestApp {
    async fn start() -> Self {
        let fake = start_fake_omdb().await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path(), &fake.url());
        let (base, _state) = start_app(&config).await;
        Self {
            _tmp: tmp,
            base,
            http: Client::new(),
            fake,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn register(&self, email: &str) -> Value {
        let res = self
            .http
            .post(self.url("/api/v1/users"))
            .json(&json!({"email": email, "password": "password123", "first_name": "Test"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        res.json().await.unwrap()
    }

    /// Register and log in; returns the access token and user id.
    async fn login(&self, email: &str) -> (String, String) {
        self.register(email).await;
        let res = self
            .http
            .post(self.url("/api/v1/auth/login"))
            .json(&json!({"email": email, "password": "password123"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        (
            body["access"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    async fn create_review(&self, token: &str, title: &str, rating: i64) -> reqwest::Response {
        self.http
            .post(self.url("/api/v1/reviews"))
            .bearer_auth(token)
            .json(&json!({"movie_title": title, "content": "Worth watching.", "rating": rating}))
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn health_and_welcome_are_public() {
    let app = TestApp::start().await;

    let health: Value = app
        .http
        .get(app.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    let res = app.http.get(app.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let app = TestApp::start().await;

    let res = app.http.get(app.url("/api/v1/reviews")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");

    let res = app
        .http
        .get(app.url("/api/v1/movies"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn registration_login_and_refresh() {
    let app = TestApp::start().await;
    let user = app.register("ann@example.com").await;
    assert_eq!(user["email"], "ann@example.com");
    assert!(user.get("password_hash").is_none());

    let dup = app
        .http
        .post(app.url("/api/v1/users"))
        .json(&json!({"email": "ann@EXAMPLE.com", "password": "password123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(dup.status(), StatusCode::CONFLICT);

    let weak = app
        .http
        .post(app.url("/api/v1/users"))
        .json(&json!({"email": "bob@example.com", "password": "short"}))
        .send()
        .await
        .unwrap();
    assert_eq!(weak.status(), StatusCode::BAD_REQUEST);
    let body: Value = weak.json().await.unwrap();
    assert_eq!(body["error"]["field"], "password");

    let bad = app
        .http
        .post(app.url("/api/v1/auth/login"))
        .json(&json!({"email": "ann@example.com", "password": "wrong-password"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);

    let tokens: Value = app
        .http
        .post(app.url("/api/v1/auth/login"))
        .json(&json!({"email": "ann@example.com", "password": "password123"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let refresh = tokens["refresh"].as_str().unwrap();

    // A refresh token is not an access token.
    let res = app
        .http
        .get(app.url("/api/v1/auth/me"))
        .bearer_auth(refresh)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let renewed: Value = app
        .http
        .post(app.url("/api/v1/auth/refresh"))
        .json(&json!({"refresh": refresh}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let me: Value = app
        .http
        .get(app.url("/api/v1/auth/me"))
        .bearer_auth(renewed["access"].as_str().unwrap())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["email"], "ann@example.com");
}

#[tokio::test]
async fn review_lifecycle() {
    let app = TestApp::start().await;
    let (ann, _) = app.login("ann@example.com").await;
    let (bob, _) = app.login("bob@example.com").await;

    let res = app.create_review(&ann, "inception", 5).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let review: Value = res.json().await.unwrap();
    assert_eq!(review["movie"]["title"], "Inception");
    assert_eq!(review["movie"]["year"], 2010);
    assert_eq!(review["user"]["email"], "ann@example.com");
    let id = review["id"].as_i64().unwrap();

    // Second review of the same movie by the same user.
    let res = app.create_review(&ann, "Inception", 3).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app.create_review(&ann, "Inception", 9).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app.create_review(&bob, "Inception", 4).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    // Only one provider lookup: the second create hit the cache.
    assert_eq!(app.fake.counters.by_title(), 1);

    let res = app
        .http
        .patch(app.url(&format!("/api/v1/reviews/{}", id)))
        .bearer_auth(&bob)
        .json(&json!({"rating": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = app
        .http
        .patch(app.url(&format!("/api/v1/reviews/{}", id)))
        .bearer_auth(&ann)
        .json(&json!({"content": "Even better the second time."}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let updated: Value = res.json().await.unwrap();
    assert_eq!(updated["rating"], 5);
    assert_eq!(updated["content"], "Even better the second time.");

    let res = app
        .http
        .put(app.url(&format!("/api/v1/reviews/{}", id)))
        .bearer_auth(&ann)
        .json(&json!({"movie_title": "No Such Movie", "content": "x", "rating": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body["error"]["message"],
        "Could not find movie 'No Such Movie'. Please check the title."
    );

    let by_movie: Value = app
        .http
        .get(app.url("/api/v1/reviews/by-movie"))
        .query(&[("title", "incep")])
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_movie["movie"], "Inception");
    assert_eq!(by_movie["count"], 2);
    assert_eq!(by_movie["average_rating"], 4.5);

    let list: Value = app
        .http
        .get(app.url("/api/v1/reviews"))
        .query(&[("page_size", "1")])
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["count"], 2);
    assert_eq!(list["results"].as_array().unwrap().len(), 1);

    let res = app
        .http
        .delete(app.url(&format!("/api/v1/reviews/{}", id)))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = app
        .http
        .get(app.url(&format!("/api/v1/reviews/{}", id)))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_movie_review_is_rejected_with_reason() {
    let app = TestApp::start().await;
    let (ann, _) = app.login("ann@example.com").await;

    let res = app.create_review(&ann, "No Such Movie", 3).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["field"], "movie_title");
    assert_eq!(
        body["error"]["message"],
        "Could not find any movie matching 'No Such Movie'. Please check spelling or try another title."
    );

    let res = app
        .http
        .get(app.url("/api/v1/reviews/by-movie"))
        .query(&[("title", "No Such Movie")])
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn movie_search_endpoint() {
    let app = TestApp::start().await;
    let (token, _) = app.login("ann@example.com").await;

    let res = app
        .http
        .get(app.url("/api/v1/movies/search"))
        .query(&[("q", "b")])
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body["error"]["message"],
        "Search term must be at least 2 characters"
    );

    let body: Value = app
        .http
        .get(app.url("/api/v1/movies/search"))
        .query(&[("q", "batman")])
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["local_results"].as_array().unwrap().len(), 0);
    assert_eq!(body["external_results"].as_array().unwrap().len(), 4);
    assert_eq!(body["external_results"][0]["external_id"], "tt0000001");
}

#[tokio::test]
async fn malformed_input_gets_the_json_error_body() {
    let app = TestApp::start().await;
    let (token, _) = app.login("ann@example.com").await;

    let wrong_type = app
        .http
        .post(app.url("/api/v1/reviews"))
        .bearer_auth(&token)
        .json(&json!({"movie_title": "Heat", "content": "Tense.", "rating": "five"}));
    let not_json = app
        .http
        .post(app.url("/api/v1/reviews"))
        .bearer_auth(&token)
        .header("content-type", "application/json")
        .body("{\"movie_title\": ");
    let bad_page = app
        .http
        .get(app.url("/api/v1/movies?page=abc"))
        .bearer_auth(&token);
    let bad_id = app
        .http
        .get(app.url("/api/v1/movies/not-a-number"))
        .bearer_auth(&token);

    for request in [wrong_type, not_json, bad_page, bad_id] {
        let res = request.send().await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
        assert!(body["error"]["message"].is_string());
    }

    // Nothing was resolved on the way.
    assert_eq!(app.fake.counters.total(), 0);
}

#[tokio::test]
async fn users_can_only_change_themselves() {
    let app = TestApp::start().await;
    let (ann, ann_id) = app.login("ann@example.com").await;
    let (bob, _) = app.login("bob@example.com").await;

    let res = app
        .http
        .patch(app.url(&format!("/api/v1/users/{}", ann_id)))
        .bearer_auth(&bob)
        .json(&json!({"first_name": "Mallory"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = app
        .http
        .patch(app.url(&format!("/api/v1/users/{}", ann_id)))
        .bearer_auth(&ann)
        .json(&json!({"first_name": "Ann"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["first_name"], "Ann");

    let list: Value = app
        .http
        .get(app.url("/api/v1/users"))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["count"], 2);

    let res = app
        .http
        .delete(app.url(&format!("/api/v1/users/{}", ann_id)))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // The token outlives the account but no longer authenticates.
    let res = app
        .http
        .get(app.url("/api/v1/auth/me"))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}
