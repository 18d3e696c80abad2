//! SQLite-backed [`CatalogStore`].

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use catalog::reference::{default_categories, default_licenses};
use catalog::{
    Category, CatalogError, CatalogStore, Layer, LayerExtent, LayerFile, License, OAuthProvider,
    Plan, PlanChange, Rating, RatingSummary, Stars, User, Visibility, Workspace,
};
use foundation::{GeoBounds, LayerId, UserId};
use sqlx::sqlite::{SqliteArguments, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const USER_COLUMNS: &str = "id, email, username, full_name, avatar_url, provider, subject, plan, \
     is_active, created_at_ms, updated_at_ms";

const LAYER_COLUMNS: &str = "id, owner_id, workspace_id, title, description, tags, source_url, \
     license, category, visibility, file_path, file_size, file_format, processed_format, \
     min_lon, min_lat, max_lon, max_lat, center_lon, center_lat, zoom_level, view_count, \
     download_count, created_at_ms, updated_at_ms";

const RATING_COLUMNS: &str =
    "id, layer_id, user_id, rating, comment, created_at_ms, updated_at_ms";

pub struct SqliteCatalogStore {
    pool: SqlitePool,
}

impl SqliteCatalogStore {
    pub async fn open_in_memory() -> Result<Self, CatalogError> {
        Self::open("sqlite::memory:").await
    }

    /// Connect, run migrations and seed reference data.
    pub async fn open(url: &str) -> Result<Self, CatalogError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            // An in-memory database lives only as long as its connection.
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect(url)
            .await
            .map_err(db_err)?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CatalogError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.seed_reference_data().await?;
        Ok(store)
    }

    async fn seed_reference_data(&self) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for c in default_categories() {
            sqlx::query(
                "INSERT OR IGNORE INTO layer_categories(name,description,icon,color) VALUES(?,?,?,?)",
            )
            .bind(c.name)
            .bind(c.description)
            .bind(c.icon)
            .bind(c.color)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        for l in default_licenses() {
            sqlx::query("INSERT OR IGNORE INTO licenses(name,description,url,is_open) VALUES(?,?,?,?)")
                .bind(l.name)
                .bind(l.description)
                .bind(l.url)
                .bind(l.is_open)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)
    }

    async fn user_where(&self, clause: &str, args: &[&str]) -> Result<Option<User>, CatalogError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}");
        let mut q = sqlx::query_as::<_, UserRow>(&sql);
        for a in args {
            q = q.bind(*a);
        }
        q.fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(User::try_from)
            .transpose()
    }

    async fn layers_where(&self, clause: &str, args: &[String]) -> Result<Vec<Layer>, CatalogError> {
        let sql = format!("SELECT {LAYER_COLUMNS} FROM layers WHERE {clause} ORDER BY created_at_ms");
        let mut q = sqlx::query_as::<_, LayerRow>(&sql);
        for a in args {
            q = q.bind(a.as_str());
        }
        q.fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(Layer::try_from)
            .collect()
    }
}

fn db_err(e: sqlx::Error) -> CatalogError {
    let s = e.to_string();
    if s.contains("UNIQUE") {
        CatalogError::Conflict(s)
    } else {
        CatalogError::Storage(s)
    }
}

fn parse<T>(column: &str, raw: &str) -> Result<T, CatalogError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| CatalogError::Storage(format!("bad {column} value {raw:?}: {e}")))
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    username: String,
    full_name: Option<String>,
    avatar_url: Option<String>,
    provider: String,
    subject: String,
    plan: String,
    is_active: bool,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl TryFrom<UserRow> for User {
    type Error = CatalogError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: parse("users.id", &r.id)?,
            email: r.email,
            username: r.username,
            full_name: r.full_name,
            avatar_url: r.avatar_url,
            provider: parse("users.provider", &r.provider)?,
            subject: r.subject,
            plan: parse("users.plan", &r.plan)?,
            is_active: r.is_active,
            created_at_ms: r.created_at_ms as u64,
            updated_at_ms: r.updated_at_ms as u64,
        })
    }
}

#[derive(FromRow)]
struct LayerRow {
    id: String,
    owner_id: String,
    workspace_id: Option<String>,
    title: String,
    description: Option<String>,
    tags: String,
    source_url: Option<String>,
    license: String,
    category: String,
    visibility: String,
    file_path: Option<String>,
    file_size: Option<i64>,
    file_format: Option<String>,
    processed_format: Option<String>,
    min_lon: Option<f64>,
    min_lat: Option<f64>,
    max_lon: Option<f64>,
    max_lat: Option<f64>,
    center_lon: Option<f64>,
    center_lat: Option<f64>,
    zoom_level: Option<i64>,
    view_count: i64,
    download_count: i64,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl TryFrom<LayerRow> for Layer {
    type Error = CatalogError;

    fn try_from(r: LayerRow) -> Result<Self, Self::Error> {
        let extent = match (r.min_lon, r.min_lat, r.max_lon, r.max_lat) {
            (Some(a), Some(b), Some(c), Some(d)) => {
                let bbox = GeoBounds::new(a, b, c, d)
                    .map_err(|e| CatalogError::Storage(format!("bad layers bbox: {e}")))?;
                let (lon, lat) = bbox.center();
                Some(LayerExtent {
                    bbox,
                    center_lon: r.center_lon.unwrap_or(lon),
                    center_lat: r.center_lat.unwrap_or(lat),
                    zoom_level: r
                        .zoom_level
                        .map(|z| z.clamp(0, 24) as u8)
                        .unwrap_or_else(|| bbox.suggested_zoom()),
                })
            }
            _ => None,
        };
        let tags: Vec<String> = serde_json::from_str(&r.tags)
            .map_err(|e| CatalogError::Storage(format!("bad layers.tags: {e}")))?;

        Ok(Layer {
            id: parse("layers.id", &r.id)?,
            owner_id: parse("layers.owner_id", &r.owner_id)?,
            workspace_id: r
                .workspace_id
                .as_deref()
                .map(|w| parse("layers.workspace_id", w))
                .transpose()?,
            title: r.title,
            description: r.description,
            tags,
            source_url: r.source_url,
            license: r.license,
            category: r.category,
            visibility: parse("layers.visibility", &r.visibility)?,
            file: r.file_path.map(|path| LayerFile {
                path,
                size: r.file_size.unwrap_or(0) as u64,
                format: r.file_format.unwrap_or_default(),
            }),
            processed_format: r.processed_format,
            extent,
            view_count: r.view_count as u64,
            download_count: r.download_count as u64,
            created_at_ms: r.created_at_ms as u64,
            updated_at_ms: r.updated_at_ms as u64,
        })
    }
}

#[derive(FromRow)]
struct RatingRow {
    id: String,
    layer_id: String,
    user_id: String,
    rating: i64,
    comment: Option<String>,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl TryFrom<RatingRow> for Rating {
    type Error = CatalogError;

    fn try_from(r: RatingRow) -> Result<Self, Self::Error> {
        Ok(Rating {
            id: parse("layer_ratings.id", &r.id)?,
            layer_id: parse("layer_ratings.layer_id", &r.layer_id)?,
            user_id: parse("layer_ratings.user_id", &r.user_id)?,
            stars: Stars::try_from(r.rating).map_err(CatalogError::Storage)?,
            comment: r.comment,
            created_at_ms: r.created_at_ms as u64,
            updated_at_ms: r.updated_at_ms as u64,
        })
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Bind the columns shared by layer insert and update, in this order:
/// workspace_id, title, description, tags, source_url, license, category,
/// file_path, file_size, file_format, processed_format, min_lon,
/// min_lat, max_lon, max_lat, center_lon, center_lat, zoom_level, updated_at_ms.
fn bind_layer<'q>(q: SqliteQuery<'q>, l: &'q Layer) -> Result<SqliteQuery<'q>, CatalogError> {
    let tags = serde_json::to_string(&l.tags).map_err(|e| CatalogError::Storage(e.to_string()))?;
    let bbox = l.extent.as_ref().map(|e| e.bbox);
    Ok(q.bind(l.workspace_id.map(|w| w.to_string()))
        .bind(&l.title)
        .bind(&l.description)
        .bind(tags)
        .bind(&l.source_url)
        .bind(&l.license)
        .bind(&l.category)
        .bind(l.file.as_ref().map(|f| f.path.as_str()))
        .bind(l.file.as_ref().map(|f| f.size as i64))
        .bind(l.file.as_ref().map(|f| f.format.as_str()))
        .bind(&l.processed_format)
        .bind(bbox.map(|b| b.min_lon()))
        .bind(bbox.map(|b| b.min_lat()))
        .bind(bbox.map(|b| b.max_lon()))
        .bind(bbox.map(|b| b.max_lat()))
        .bind(l.extent.as_ref().map(|e| e.center_lon))
        .bind(l.extent.as_ref().map(|e| e.center_lat))
        .bind(l.extent.as_ref().map(|e| i64::from(e.zoom_level)))
        .bind(l.updated_at_ms as i64))
}

#[async_trait::async_trait]
impl CatalogStore for SqliteCatalogStore {
    // ───────────────────────────── Users ─────────────────────────────

    async fn user(&self, id: &UserId) -> Result<Option<User>, CatalogError> {
        self.user_where("id=?", &[&id.to_string()]).await
    }

    async fn user_by_identity(
        &self,
        provider: OAuthProvider,
        subject: &str,
    ) -> Result<Option<User>, CatalogError> {
        self.user_where("provider=? AND subject=?", &[provider.as_str(), subject])
            .await
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, CatalogError> {
        self.user_where("email=?", &[email]).await
    }

    async fn username_taken(&self, username: &str) -> Result<bool, CatalogError> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM users WHERE username=?")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.0 > 0)
    }

    async fn insert_user(&self, u: &User) -> Result<(), CatalogError> {
        let sql = format!("INSERT INTO users({USER_COLUMNS}) VALUES(?,?,?,?,?,?,?,?,?,?,?)");
        sqlx::query(&sql)
            .bind(u.id.to_string())
            .bind(&u.email)
            .bind(&u.username)
            .bind(&u.full_name)
            .bind(&u.avatar_url)
            .bind(u.provider.as_str())
            .bind(&u.subject)
            .bind(u.plan.as_str())
            .bind(u.is_active)
            .bind(u.created_at_ms as i64)
            .bind(u.updated_at_ms as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update_user(&self, u: &User) -> Result<(), CatalogError> {
        let res = sqlx::query(
            "UPDATE users SET email=?, username=?, full_name=?, avatar_url=?, provider=?, \
             subject=?, plan=?, is_active=?, updated_at_ms=? WHERE id=?",
        )
        .bind(&u.email)
        .bind(&u.username)
        .bind(&u.full_name)
        .bind(&u.avatar_url)
        .bind(u.provider.as_str())
        .bind(&u.subject)
        .bind(u.plan.as_str())
        .bind(u.is_active)
        .bind(u.updated_at_ms as i64)
        .bind(u.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(CatalogError::NotFound("User"));
        }
        Ok(())
    }

    async fn set_plan(
        &self,
        id: &UserId,
        plan: Plan,
        now_ms: u64,
    ) -> Result<PlanChange, CatalogError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let previous = sqlx::query_as::<_, (String,)>("SELECT plan FROM users WHERE id=?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or(CatalogError::NotFound("User"))?;
        let previous: Plan = parse("users.plan", &previous.0)?;

        sqlx::query("UPDATE users SET plan=?, updated_at_ms=? WHERE id=?")
            .bind(plan.as_str())
            .bind(now_ms as i64)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let published_layers = if plan.allows_private_layers() {
            0
        } else {
            sqlx::query(
                "UPDATE layers SET visibility='public', updated_at_ms=? \
                 WHERE owner_id=? AND visibility='private'",
            )
            .bind(now_ms as i64)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected()
        };

        tx.commit().await.map_err(db_err)?;
        Ok(PlanChange {
            user_id: *id,
            previous,
            current: plan,
            published_layers,
        })
    }

    // ───────────────────────────── Workspaces ─────────────────────────────

    async fn workspace_of(&self, owner: &UserId) -> Result<Option<Workspace>, CatalogError> {
        let row = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT id, name, created_at_ms FROM workspaces WHERE owner_id=?",
        )
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|(id, name, created)| -> Result<Workspace, CatalogError> {
            Ok(Workspace {
                id: parse("workspaces.id", &id)?,
                owner_id: *owner,
                name,
                created_at_ms: created as u64,
            })
        })
        .transpose()
    }

    async fn get_or_insert_workspace(
        &self,
        ws: Workspace,
    ) -> Result<Workspace, CatalogError> {
        sqlx::query(
            "INSERT INTO workspaces(id, owner_id, name, created_at_ms) VALUES(?,?,?,?) \
             ON CONFLICT(owner_id) DO NOTHING",
        )
        .bind(ws.id.to_string())
        .bind(ws.owner_id.to_string())
        .bind(&ws.name)
        .bind(ws.created_at_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.workspace_of(&ws.owner_id)
            .await?
            .ok_or(CatalogError::NotFound("Workspace"))
    }

    // ───────────────────────────── Layers ─────────────────────────────

    async fn insert_layer(&self, layer: &Layer) -> Result<(), CatalogError> {
        let q = sqlx::query(
            "INSERT INTO layers(workspace_id, title, description, tags, source_url, license, \
             category, file_path, file_size, file_format, processed_format, \
             min_lon, min_lat, max_lon, max_lat, center_lon, center_lat, zoom_level, \
             updated_at_ms, visibility, id, owner_id, view_count, download_count, created_at_ms) \
             VALUES(?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        );
        bind_layer(q, layer)?
            .bind(layer.visibility.as_str())
            .bind(layer.id.to_string())
            .bind(layer.owner_id.to_string())
            .bind(layer.view_count as i64)
            .bind(layer.download_count as i64)
            .bind(layer.created_at_ms as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if e.to_string().contains("FOREIGN KEY") {
                    CatalogError::NotFound("User")
                } else {
                    db_err(e)
                }
            })?;
        Ok(())
    }

    async fn layer(&self, id: &LayerId) -> Result<Option<Layer>, CatalogError> {
        Ok(self
            .layers_where("id=?", &[id.to_string()])
            .await?
            .into_iter()
            .next())
    }

    async fn update_layer(
        &self,
        layer: &Layer,
        visibility: Option<Visibility>,
    ) -> Result<Layer, CatalogError> {
        // Counters are only touched by record_view / record_download.
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let owner_plan = sqlx::query_as::<_, (String,)>(
            "SELECT users.plan FROM layers JOIN users ON users.id = layers.owner_id \
             WHERE layers.id=?",
        )
        .bind(layer.id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or(CatalogError::NotFound("Layer"))?;
        let owner_plan: Plan = parse("users.plan", &owner_plan.0)?;
        if visibility == Some(Visibility::Private) && !owner_plan.allows_private_layers() {
            return Err(CatalogError::Forbidden(
                "Private layers require a paid plan".to_string(),
            ));
        }

        let q = sqlx::query(
            "UPDATE layers SET workspace_id=?, title=?, description=?, tags=?, source_url=?, \
             license=?, category=?, file_path=?, file_size=?, file_format=?, \
             processed_format=?, min_lon=?, min_lat=?, max_lon=?, max_lat=?, center_lon=?, \
             center_lat=?, zoom_level=?, updated_at_ms=?, visibility=COALESCE(?, visibility) \
             WHERE id=?",
        );
        let res = bind_layer(q, layer)?
            .bind(visibility.map(|v| v.as_str()))
            .bind(layer.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(CatalogError::NotFound("Layer"));
        }
        tx.commit().await.map_err(db_err)?;

        self.layer(&layer.id)
            .await?
            .ok_or(CatalogError::NotFound("Layer"))
    }

    async fn delete_layer(&self, id: &LayerId) -> Result<Option<Layer>, CatalogError> {
        let Some(layer) = self.layer(id).await? else {
            return Ok(None);
        };
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM layer_ratings WHERE layer_id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let res = sqlx::query("DELETE FROM layers WHERE id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok((res.rows_affected() > 0).then_some(layer))
    }

    async fn record_view(&self, id: &LayerId) -> Result<(), CatalogError> {
        let res = sqlx::query("UPDATE layers SET view_count = view_count + 1 WHERE id=?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(CatalogError::NotFound("Layer"));
        }
        Ok(())
    }

    async fn record_download(&self, id: &LayerId) -> Result<(), CatalogError> {
        let res = sqlx::query("UPDATE layers SET download_count = download_count + 1 WHERE id=?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(CatalogError::NotFound("Layer"));
        }
        Ok(())
    }

    async fn visible_layers(&self, requester: Option<&UserId>) -> Result<Vec<Layer>, CatalogError> {
        match requester {
            Some(user) => {
                self.layers_where("visibility='public' OR owner_id=?", &[user.to_string()])
                    .await
            }
            None => self.layers_where("visibility='public'", &[]).await,
        }
    }

    async fn layers_by_owner(&self, owner: &UserId) -> Result<Vec<Layer>, CatalogError> {
        self.layers_where("owner_id=?", &[owner.to_string()]).await
    }

    // ───────────────────────────── Ratings ─────────────────────────────

    async fn upsert_rating(&self, r: &Rating) -> Result<Rating, CatalogError> {
        sqlx::query(
            "INSERT INTO layer_ratings(id, layer_id, user_id, rating, comment, created_at_ms, \
             updated_at_ms) VALUES(?,?,?,?,?,?,?) \
             ON CONFLICT(layer_id, user_id) DO UPDATE SET rating=excluded.rating, \
             comment=excluded.comment, updated_at_ms=excluded.updated_at_ms",
        )
        .bind(r.id.to_string())
        .bind(r.layer_id.to_string())
        .bind(r.user_id.to_string())
        .bind(i64::from(r.stars.get()))
        .bind(&r.comment)
        .bind(r.created_at_ms as i64)
        .bind(r.updated_at_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("FOREIGN KEY") {
                CatalogError::NotFound("Layer")
            } else {
                db_err(e)
            }
        })?;

        let sql = format!("SELECT {RATING_COLUMNS} FROM layer_ratings WHERE layer_id=? AND user_id=?");
        let row = sqlx::query_as::<_, RatingRow>(&sql)
            .bind(r.layer_id.to_string())
            .bind(r.user_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Rating::try_from(row)
    }

    async fn delete_rating(&self, layer: &LayerId, user: &UserId) -> Result<bool, CatalogError> {
        let res = sqlx::query("DELETE FROM layer_ratings WHERE layer_id=? AND user_id=?")
            .bind(layer.to_string())
            .bind(user.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected() > 0)
    }

    async fn user_ratings(
        &self,
        user: &UserId,
        layers: &[LayerId],
    ) -> Result<HashMap<LayerId, Stars>, CatalogError> {
        if layers.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT layer_id, rating FROM layer_ratings WHERE user_id=");
        qb.push_bind(user.to_string());
        qb.push(" AND layer_id IN (");
        let mut ids = qb.separated(", ");
        for id in layers {
            ids.push_bind(id.to_string());
        }
        ids.push_unseparated(")");

        let rows = qb
            .build_query_as::<(String, i64)>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter()
            .map(|(layer, rating)| -> Result<(LayerId, Stars), CatalogError> {
                Ok((
                    parse("layer_ratings.layer_id", &layer)?,
                    Stars::try_from(rating).map_err(CatalogError::Storage)?,
                ))
            })
            .collect()
    }

    async fn rating_summaries(
        &self,
        layers: &[LayerId],
    ) -> Result<HashMap<LayerId, RatingSummary>, CatalogError> {
        if layers.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT layer_id, SUM(rating), COUNT(*) FROM layer_ratings WHERE layer_id IN (",
        );
        let mut ids = qb.separated(", ");
        for id in layers {
            ids.push_bind(id.to_string());
        }
        ids.push_unseparated(") GROUP BY layer_id");

        let rows = qb
            .build_query_as::<(String, i64, i64)>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter()
            .map(|(layer, total, count)| -> Result<(LayerId, RatingSummary), CatalogError> {
                Ok((
                    parse("layer_ratings.layer_id", &layer)?,
                    RatingSummary {
                        total: total as u64,
                        count: count as u64,
                    },
                ))
            })
            .collect()
    }

    // ───────────────────────────── Plans ─────────────────────────────

    async fn publish_private_layers_of_free_users(&self, now_ms: u64) -> Result<u64, CatalogError> {
        let res = sqlx::query(
            "UPDATE layers SET visibility='public', updated_at_ms=? \
             WHERE visibility='private' AND owner_id IN (SELECT id FROM users WHERE plan='free')",
        )
        .bind(now_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(res.rows_affected())
    }

    // ───────────────────────────── Reference data ─────────────────────────────

    async fn categories(&self) -> Result<Vec<Category>, CatalogError> {
        let rows = sqlx::query_as::<_, (String, Option<String>, Option<String>, Option<String>)>(
            "SELECT name, description, icon, color FROM layer_categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(name, description, icon, color)| Category {
                name,
                description,
                icon,
                color,
            })
            .collect())
    }

    async fn licenses(&self) -> Result<Vec<License>, CatalogError> {
        let rows = sqlx::query_as::<_, (String, Option<String>, Option<String>, bool)>(
            "SELECT name, description, url, is_open FROM licenses ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(name, description, url, is_open)| License {
                name,
                description,
                url,
                is_open,
            })
            .collect())
    }
}
