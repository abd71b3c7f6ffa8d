//! Small seeded catalog used by repository and agent tests.

use crate::repositories::RepositoryError;
use crate::DbPool;

/// Seeds a handful of Persian catalog rows: two desks and a blender, spread
/// over three shops in two cities. Shop 101 deliberately carries two listings
/// for the same base product at different prices.
pub async fn seed_catalog(pool: &DbPool) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO cities (id, name) VALUES
             (1, 'تهران'),
             (2, 'اصفهان')",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO brands (id, title) VALUES
             (1, 'چوب آرا'),
             (2, 'پارس خزر')",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO categories (id, title, parent_id) VALUES
             (1, 'مبلمان اداری', -1),
             (2, 'لوازم خانگی برقی', -1)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO shops (id, city_id, score, has_warranty) VALUES
             (101, 1, 4.6, 1),
             (102, 1, 3.9, 0),
             (103, 2, 4.2, 1)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO base_products
             (random_key, persian_name, english_name, category_id, brand_id, extra_features, image_url)
         VALUES
             ('base-desk-1', 'میز تحریر چوبی ساده', 'plain wooden desk', 1, 1,
              '{\"جنس\": \"چوب راش\", \"رنگ\": \"قهوه ای\"}', NULL),
             ('base-desk-2', 'میز تحریر فلزی دو کشو', 'metal desk two drawers', 1, 1,
              '{\"جنس\": \"فلز\", \"تعداد کشو\": \"2\"}', NULL),
             ('base-blender-1', 'مخلوط کن پارس خزر مدل گرند', 'pars khazar grand blender', 2, 2,
              '{\"توان\": \"700 وات\"}', NULL)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO members (random_key, base_random_key, shop_id, price) VALUES
             ('member-desk-1a', 'base-desk-1', 101, 2500000),
             ('member-desk-1b', 'base-desk-1', 101, 2350000),
             ('member-desk-1c', 'base-desk-1', 102, 2200000),
             ('member-desk-2a', 'base-desk-2', 103, 3100000),
             ('member-blender-1a', 'base-blender-1', 102, 1850000),
             ('member-blender-1b', 'base-blender-1', 103, 1790000)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
